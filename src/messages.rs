//! Localized mail content.
//!
//! Alert mails are written in the job's locale and carry an HTML
//! alternative with a highlighted forecast table and an inline hydrograph.
//! Operational mails (job down/recovered, watchdog) are plain English text.

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;

use crate::chart::{ChartLabels, hydrograph_svg};
use crate::model::{Crossing, Job, Locale, Provenance, Reading, StationData};
use crate::notifier::EmailMessage;
use crate::threshold::forecast_uncertainty_cm;
use crate::watchdog::{ContainerEvent, ContainerEventKind};

struct Catalog {
    subject: &'static str,
    section_station: &'static str,
    section_alert: &'static str,
    section_forecast: &'static str,
    station_uuid: &'static str,
    short_name: &'static str,
    long_name: &'static str,
    water_body: &'static str,
    timeseries: &'static str,
    threshold: &'static str,
    current_value: &'static str,
    trigger_source: &'static str,
    trigger_value: &'static str,
    trigger_time: &'static str,
    max_forecast: &'static str,
    at: &'static str,
    source_current: &'static str,
    source_official: &'static str,
    source_trend: &'static str,
    trend_disclaimer: &'static str,
    no_forecast: &'static str,
    table_timestamp: &'static str,
    table_value: &'static str,
    table_above: &'static str,
    table_confidence: &'static str,
    yes: &'static str,
    no: &'static str,
    section_hydrograph: &'static str,
    chart_now: &'static str,
    chart_threshold: &'static str,
    chart_time_axis: &'static str,
    chart_legend: &'static str,
    chart_not_enough_points: &'static str,
}

const DE: Catalog = Catalog {
    subject: "Hochwasserwarnung: {station} erreicht {limit} {unit}",
    section_station: "Stationsinformationen",
    section_alert: "Alarmkontext",
    section_forecast: "Vorhersagedaten",
    station_uuid: "Stations-UUID",
    short_name: "Kurzname",
    long_name: "Langname",
    water_body: "Gewässer",
    timeseries: "Zeitreihen",
    threshold: "Grenzwert",
    current_value: "Aktueller Wert",
    trigger_source: "Auslöser",
    trigger_value: "Auslösewert",
    trigger_time: "Auslösezeit",
    max_forecast: "Maximaler Vorhersagewert",
    at: "um",
    source_current: "aktuelle Messung",
    source_official: "amtliche Vorhersage",
    source_trend: "Trendberechnung",
    trend_disclaimer: "Hinweis: Für diese Station liegt keine amtliche Vorhersage vor. \
        Der Zeitpunkt wurde aus dem linearen Trend der letzten Messwerte geschätzt \
        und ist entsprechend unsicher.",
    no_forecast: "Keine Vorhersagepunkte verfügbar.",
    table_timestamp: "Zeitpunkt",
    table_value: "Wert",
    table_above: "Über Grenzwert",
    table_confidence: "Unsicherheitsbereich",
    yes: "ja",
    no: "nein",
    section_hydrograph: "Ganglinie",
    chart_now: "jetzt",
    chart_threshold: "Grenzwert {limit} {unit}",
    chart_time_axis: "Zeit ({zone})",
    chart_legend: "Blau: unter dem Grenzwert, rot: am oder über dem Grenzwert. \
        Grau hinterlegt: Unsicherheitsbereich der Vorhersage.",
    chart_not_enough_points: "Nicht genügend Messpunkte für eine Ganglinie.",
};

const EN: Catalog = Catalog {
    subject: "Flood alert: {station} reaches {limit} {unit}",
    section_station: "Station information",
    section_alert: "Alert context",
    section_forecast: "Forecast data",
    station_uuid: "Station UUID",
    short_name: "Short name",
    long_name: "Long name",
    water_body: "Water body",
    timeseries: "Time series",
    threshold: "Threshold",
    current_value: "Current value",
    trigger_source: "Trigger source",
    trigger_value: "Trigger value",
    trigger_time: "Trigger time",
    max_forecast: "Maximum forecast value",
    at: "at",
    source_current: "current measurement",
    source_official: "official forecast",
    source_trend: "trend extrapolation",
    trend_disclaimer: "Note: no official forecast is available for this station. \
        The time was estimated from the linear trend of recent measurements \
        and carries reduced confidence.",
    no_forecast: "No forecast points available.",
    table_timestamp: "Timestamp",
    table_value: "Value",
    table_above: "Above limit",
    table_confidence: "Uncertainty band",
    yes: "yes",
    no: "no",
    section_hydrograph: "Hydrograph",
    chart_now: "now",
    chart_threshold: "Threshold {limit} {unit}",
    chart_time_axis: "Time ({zone})",
    chart_legend: "Blue: below the limit, red: at or above the limit. \
        Grey area: forecast uncertainty band.",
    chart_not_enough_points: "Not enough data points for a hydrograph.",
};

fn catalog(locale: Locale) -> &'static Catalog {
    match locale {
        Locale::De => &DE,
        Locale::En => &EN,
    }
}

/// Format a number with locale-specific grouping and decimal separators.
pub fn format_float(value: f64, locale: Locale, digits: usize) -> String {
    let formatted = format!("{:.*}", digits, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (formatted.as_str(), None),
    };

    let (group_sep, decimal_sep) = match locale {
        Locale::De => ('.', ','),
        Locale::En => (',', '.'),
    };

    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(group_sep);
        }
        grouped.push(ch);
    }

    let negative = value < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0');
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(frac) = frac_part {
        out.push(decimal_sep);
        out.push_str(frac);
    }
    out
}

fn format_local(timestamp: DateTime<Utc>, zone: Tz, locale: Locale) -> String {
    let local = timestamp.with_timezone(&zone);
    match locale {
        Locale::De => local.format("%d.%m.%Y %H:%M %Z").to_string(),
        Locale::En => local.format("%Y-%m-%d %H:%M %Z").to_string(),
    }
}

fn provenance_label(provenance: Provenance, locale: Locale) -> &'static str {
    let c = catalog(locale);
    match provenance {
        Provenance::Current => c.source_current,
        Provenance::Official => c.source_official,
        Provenance::Trend => c.source_trend,
    }
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

/// Escape text for use in HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn uncertainty_band(point: &Reading, reference: DateTime<Utc>, unit: &str, locale: Locale) -> String {
    match forecast_uncertainty_cm(reference, point.timestamp()) {
        Some(delta) => format!(
            "{}..{} {}",
            format_float(point.value() - delta, locale, 1),
            format_float(point.value() + delta, locale, 1),
            unit
        ),
        None => "-".to_string(),
    }
}

/// Build the alert mail for a crossing.
pub fn alert_message(
    job: &Job,
    data: &StationData,
    crossing: &Crossing,
    now: DateTime<Utc>,
    zone: Tz,
) -> EmailMessage {
    let locale = job.locale;
    let c = catalog(locale);
    let station = &data.station;
    let unit = station.unit.as_str();
    let num = |value: f64| format_float(value, locale, 1);

    let subject = c
        .subject
        .replace("{station}", &station.shortname)
        .replace("{limit}", &num(job.limit_cm))
        .replace("{unit}", unit);

    let series: Vec<&str> = station
        .timeseries
        .iter()
        .map(|s| s.shortname.as_str())
        .collect();
    let water = if station.water_longname.is_empty() {
        &station.water_shortname
    } else {
        &station.water_longname
    };

    let max_forecast = data
        .forecast
        .iter()
        .max_by(|a, b| a.value().total_cmp(&b.value()))
        .map(|point| {
            format!(
                "{} {} ({} {})",
                num(point.value()),
                unit,
                c.at,
                format_local(point.timestamp(), zone, locale)
            )
        })
        .unwrap_or_else(|| "-".to_string());

    let station_fields = [
        (c.station_uuid, station.uuid.clone()),
        (c.short_name, station.shortname.clone()),
        (c.long_name, station.longname.clone()),
        (c.water_body, or_dash(water).to_string()),
        (c.timeseries, or_dash(&series.join(", ")).to_string()),
    ];
    let alert_fields = [
        (c.threshold, format!("{} {}", num(job.limit_cm), unit)),
        (
            c.current_value,
            format!(
                "{} {} ({} {})",
                num(data.current.value()),
                unit,
                c.at,
                format_local(data.current.timestamp(), zone, locale)
            ),
        ),
        (c.trigger_source, provenance_label(crossing.provenance, locale).to_string()),
        (c.trigger_value, format!("{} {}", num(crossing.value), unit)),
        (c.trigger_time, format_local(crossing.timestamp, zone, locale)),
        (c.max_forecast, max_forecast),
    ];
    let disclaimer = (crossing.provenance == Provenance::Trend).then_some(c.trend_disclaimer);

    let mut body = String::new();
    push_section(&mut body, c.section_station, &station_fields);
    push_section(&mut body, c.section_alert, &alert_fields);
    if let Some(note) = disclaimer {
        body.push_str(note);
        body.push_str("\n\n");
    }
    body.push_str(&format!("{}\n{}\n", c.section_forecast, "-".repeat(c.section_forecast.chars().count())));
    body.push_str(&forecast_table(&data.forecast, now, job.limit_cm, unit, zone, locale));
    body.push('\n');

    let labels = ChartLabels {
        now: c.chart_now.to_string(),
        threshold: c
            .chart_threshold
            .replace("{limit}", &num(job.limit_cm))
            .replace("{unit}", unit),
        time_axis: c.chart_time_axis.replace("{zone}", zone.name()),
        title: c.section_hydrograph.to_string(),
    };
    let chart = match hydrograph_svg(data, now, job.limit_cm, &labels, zone, locale) {
        Some(svg) => format!(
            "<div>{svg}<p style=\"margin:6px 0 0;color:#555;font-size:12px\">{}</p></div>",
            escape_html(c.chart_legend)
        ),
        None => format!("<p>{}</p>", escape_html(c.chart_not_enough_points)),
    };

    let mut html = String::from("<html><body style=\"font-family:Arial,sans-serif;font-size:14px;color:#111\">");
    html.push_str(&html_section(c.section_station, &station_fields));
    html.push_str(&html_section(c.section_alert, &alert_fields));
    if let Some(note) = disclaimer {
        html.push_str(&format!("<p style=\"color:#8a5300\">{}</p>", escape_html(note)));
    }
    html.push_str(&format!("<h3>{}</h3>{chart}", escape_html(c.section_hydrograph)));
    html.push_str(&format!("<h3>{}</h3>", escape_html(c.section_forecast)));
    html.push_str(&forecast_table_html(&data.forecast, now, job.limit_cm, unit, zone, locale));
    html.push_str("</body></html>");

    EmailMessage {
        recipients: job.recipients.iter().cloned().collect(),
        subject,
        body,
        html_body: Some(html),
    }
}

fn push_section(body: &mut String, title: &str, fields: &[(&str, String)]) {
    body.push_str(&format!("{}\n{}\n", title, "-".repeat(title.chars().count())));
    for (label, value) in fields {
        body.push_str(&format!("{label}: {value}\n"));
    }
    body.push('\n');
}

fn html_section(title: &str, fields: &[(&str, String)]) -> String {
    let lines: Vec<String> = fields
        .iter()
        .map(|(label, value)| format!("{}: {}", escape_html(label), escape_html(value)))
        .collect();
    format!("<h3>{}</h3><p>{}</p>", escape_html(title), lines.join("<br>"))
}

fn forecast_table(
    points: &[Reading],
    reference: DateTime<Utc>,
    limit_cm: f64,
    unit: &str,
    zone: Tz,
    locale: Locale,
) -> String {
    let c = catalog(locale);
    if points.is_empty() {
        return c.no_forecast.to_string();
    }

    let header = format!(
        "{:<20} | {:>10} | {:<16} | {:<24}",
        c.table_timestamp, c.table_value, c.table_above, c.table_confidence
    );
    let mut rows = vec![header.clone(), "-".repeat(header.chars().count())];

    for point in points {
        let above = if point.value() >= limit_cm { c.yes } else { c.no };
        let band = uncertainty_band(point, reference, unit, locale);
        rows.push(format!(
            "{:<20} | {:>7} {:<2} | {:<16} | {:<24}",
            format_local(point.timestamp(), zone, locale),
            format_float(point.value(), locale, 1),
            unit,
            above,
            band
        ));
    }

    rows.join("\n")
}

const CELL: &str = "padding:6px;border:1px solid #ddd";

fn forecast_table_html(
    points: &[Reading],
    reference: DateTime<Utc>,
    limit_cm: f64,
    unit: &str,
    zone: Tz,
    locale: Locale,
) -> String {
    let c = catalog(locale);
    if points.is_empty() {
        return format!("<p>{}</p>", escape_html(c.no_forecast));
    }

    let mut rows = String::new();
    for point in points {
        let above = point.value() >= limit_cm;
        let mut value = format!("{} {}", format_float(point.value(), locale, 1), escape_html(unit));
        if above {
            value = format!("<strong style=\"color:#b00020\">{value}</strong>");
        }
        rows.push_str(&format!(
            "<tr{}><td style=\"{CELL}\">{}</td><td style=\"{CELL};text-align:right\">{value}</td>\
             <td style=\"{CELL}\">{}</td><td style=\"{CELL}\">{}</td></tr>",
            if above { " style=\"background:#fdecef\"" } else { "" },
            escape_html(&format_local(point.timestamp(), zone, locale)),
            if above { c.yes } else { c.no },
            escape_html(&uncertainty_band(point, reference, unit, locale)),
        ));
    }

    let header: String = [c.table_timestamp, c.table_value, c.table_above, c.table_confidence]
        .iter()
        .map(|title| format!("<th style=\"{CELL};text-align:left\">{}</th>", escape_html(title)))
        .collect();
    format!("<table style=\"border-collapse:collapse\"><thead><tr>{header}</tr></thead><tbody>{rows}</tbody></table>")
}

/// Recipients of job down/recovered mails: admins plus the job's own
/// alert recipient, without duplicates, in that order.
pub fn job_status_recipients(admin_recipients: &[String], job: &Job) -> Vec<String> {
    let mut recipients: Vec<String> = Vec::new();
    for address in admin_recipients.iter().chain(job.alert_recipient.iter()) {
        if !recipients.contains(address) {
            recipients.push(address.clone());
        }
    }
    recipients
}

/// Mail sent when a job crosses the failure threshold.
pub fn job_down_message(
    job: &Job,
    admin_recipients: &[String],
    failure_threshold: u32,
    last_error: &str,
) -> EmailMessage {
    EmailMessage {
        recipients: job_status_recipients(admin_recipients, job),
        subject: format!("[DOWN] Job {} ({}) degraded", job.name, job.job_uuid),
        body: format!(
            "A job crossed the configured health failure threshold.\n\n\
             Job UUID: {}\n\
             Job name: {}\n\
             Station UUID: {}\n\
             Schedule: {}\n\
             Failure threshold: {}\n\
             Last error: {}\n",
            job.job_uuid, job.name, job.station_uuid, job.schedule_cron, failure_threshold, last_error
        ),
        html_body: None,
    }
}

/// Mail sent when a degraded job succeeds again.
pub fn job_recovered_message(job: &Job, admin_recipients: &[String], now: DateTime<Utc>) -> EmailMessage {
    EmailMessage {
        recipients: job_status_recipients(admin_recipients, job),
        subject: format!("[RECOVERED] Job {} ({}) healthy again", job.name, job.job_uuid),
        body: format!(
            "A previously degraded job completed a cycle successfully.\n\n\
             Job UUID: {}\n\
             Job name: {}\n\
             Station UUID: {}\n\
             Schedule: {}\n\
             Recovered at (UTC): {}\n",
            job.job_uuid,
            job.name,
            job.station_uuid,
            job.schedule_cron,
            now.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        html_body: None,
    }
}

/// Mail for a container failure or recovery.
pub fn watchdog_message(
    recipients: &[String],
    event: &ContainerEvent,
    now: DateTime<Utc>,
    restart_note: Option<&str>,
) -> EmailMessage {
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let kind = event.kind.as_str();

    let mut body = format!(
        "Container: {}\nEvent: {}\nOriginal Docker action: {}\nTime (UTC): {}\nActor ID: {}\n",
        event.container_name,
        kind,
        event.action,
        timestamp,
        event.actor_id.as_deref().unwrap_or("-")
    );
    if let Some(note) = restart_note {
        body.push_str(&format!("Auto-restart: {note}\n"));
    }
    if event.kind == ContainerEventKind::HealthRecovered {
        body.push_str("The container reports healthy again.\n");
    }

    EmailMessage {
        recipients: recipients.to_vec(),
        subject: format!(
            "[Hochwasser Watchdog] {} {} at {}",
            event.container_name, kind, timestamp
        ),
        body,
        html_body: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StationInfo, TimeseriesInfo};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 13, 12, 0, 0).unwrap()
    }

    fn job(locale: Locale) -> Job {
        Job {
            job_uuid: "job-1".to_string(),
            name: "koeln".to_string(),
            station_uuid: "station-1".to_string(),
            limit_cm: 1200.0,
            recipients: ["b@example.com", "a@example.com"]
                .iter()
                .map(|r| r.to_string())
                .collect(),
            alert_recipient: Some("ops@example.com".to_string()),
            locale,
            schedule_cron: "0 * * * *".to_string(),
        }
    }

    fn data() -> StationData {
        StationData {
            station: StationInfo {
                uuid: "station-1".to_string(),
                shortname: "KÖLN".to_string(),
                longname: "KÖLN".to_string(),
                water_shortname: "RHEIN".to_string(),
                water_longname: "RHEIN".to_string(),
                unit: "cm".to_string(),
                timeseries: vec![TimeseriesInfo {
                    shortname: "W".to_string(),
                    unit: Some("cm".to_string()),
                    start: None,
                    end: None,
                }],
            },
            current: Reading::current(t0(), 1150.0),
            history: vec![],
            forecast: vec![
                Reading::forecast(t0() + Duration::hours(6), 1190.0),
                Reading::forecast(t0() + Duration::hours(24), 1234.5),
            ],
            forecast_horizon: Some(Duration::hours(48)),
        }
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(1234.56, Locale::De, 1), "1.234,6");
        assert_eq!(format_float(1234.56, Locale::En, 1), "1,234.6");
        assert_eq!(format_float(305.0, Locale::De, 1), "305,0");
        assert_eq!(format_float(-1234567.0, Locale::En, 0), "-1,234,567");
        assert_eq!(format_float(-0.01, Locale::En, 1), "0.0");
    }

    #[test]
    fn test_alert_message_german() {
        let crossing = Crossing {
            timestamp: t0() + Duration::hours(24),
            value: 1234.5,
            provenance: Provenance::Official,
        };

        let message = alert_message(&job(Locale::De), &data(), &crossing, t0(), chrono_tz::Europe::Berlin);

        assert_eq!(message.subject, "Hochwasserwarnung: KÖLN erreicht 1.200,0 cm");
        assert_eq!(message.recipients, vec!["a@example.com", "b@example.com"]);
        assert!(message.body.contains("amtliche Vorhersage"));
        assert!(message.body.contains("14.02.2026 13:00 CET"));
        assert!(message.body.contains("1.224,5..1.244,5 cm"));
        assert!(!message.body.contains("Trend der letzten"));
    }

    #[test]
    fn test_alert_message_html_alternative() {
        let crossing = Crossing {
            timestamp: t0() + Duration::hours(24),
            value: 1234.5,
            provenance: Provenance::Official,
        };
        let mut station_data = data();
        station_data.station.longname = "KÖLN <Rhein & Co>".to_string();

        let message = alert_message(&job(Locale::De), &station_data, &crossing, t0(), chrono_tz::Europe::Berlin);

        let html = message.html_body.unwrap();
        assert!(html.starts_with("<html>"));
        assert!(html.contains("<h3>Ganglinie</h3><div><svg"));
        assert!(html.contains("Grenzwert 1.200,0 cm"));
        assert!(html.contains("Zeit (Europe/Berlin)"));
        assert_eq!(html.matches("background:#fdecef").count(), 1);
        assert!(html.contains("<strong style=\"color:#b00020\">1.234,5 cm</strong>"));
        assert!(html.contains("1.224,5..1.244,5 cm"));
        assert!(html.contains("KÖLN &lt;Rhein &amp; Co&gt;"));
        assert!(!html.contains("<Rhein"));
        assert!(message.body.contains("KÖLN <Rhein & Co>"));
    }

    #[test]
    fn test_alert_without_chart_points_says_so() {
        let crossing = Crossing {
            timestamp: t0(),
            value: 1250.0,
            provenance: Provenance::Current,
        };
        let mut station_data = data();
        station_data.forecast.clear();

        let message = alert_message(&job(Locale::En), &station_data, &crossing, t0(), chrono_tz::UTC);

        let html = message.html_body.unwrap();
        assert!(!html.contains("<svg"));
        assert!(html.contains("Not enough data points for a hydrograph."));
        assert!(html.contains("<p>No forecast points available.</p>"));
    }

    #[test]
    fn test_operational_mails_are_plain_text() {
        let message = job_down_message(&job(Locale::En), &[], 3, "timeout");

        assert_eq!(message.html_body, None);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&#x27;");
        assert_eq!(escape_html("Köln"), "Köln");
    }

    #[test]
    fn test_trend_alert_carries_disclaimer() {
        let crossing = Crossing {
            timestamp: t0() + Duration::hours(5),
            value: 1200.0,
            provenance: Provenance::Trend,
        };
        let mut station_data = data();
        station_data.forecast.clear();

        let message = alert_message(&job(Locale::En), &station_data, &crossing, t0(), chrono_tz::UTC);

        assert!(message.body.contains("trend extrapolation"));
        assert!(message.body.contains("reduced confidence"));
        assert!(message.body.contains("No forecast points available."));
        assert!(message.body.contains("2026-02-13 17:00 UTC"));
    }

    #[test]
    fn test_job_status_recipients_deduplicated_in_order() {
        let admins = vec!["ops@example.com".to_string(), "admin@example.com".to_string()];

        let recipients = job_status_recipients(&admins, &job(Locale::De));

        assert_eq!(recipients, vec!["ops@example.com", "admin@example.com"]);
    }

    #[test]
    fn test_job_down_message() {
        let message = job_down_message(&job(Locale::De), &["admin@example.com".to_string()], 3, "HTTP 503");

        assert_eq!(message.subject, "[DOWN] Job koeln (job-1) degraded");
        assert_eq!(message.recipients, vec!["admin@example.com", "ops@example.com"]);
        assert!(message.body.contains("Failure threshold: 3"));
        assert!(message.body.contains("Last error: HTTP 503"));
    }

    #[test]
    fn test_watchdog_message_includes_restart_note() {
        let event = ContainerEvent {
            container_name: "hochwasser-alert".to_string(),
            kind: ContainerEventKind::Unhealthy,
            action: "health_status: unhealthy".to_string(),
            actor_id: Some("abc123".to_string()),
        };

        let message = watchdog_message(&["ops@example.com".to_string()], &event, t0(), Some("restart requested"));

        assert_eq!(
            message.subject,
            "[Hochwasser Watchdog] hochwasser-alert unhealthy at 2026-02-13T12:00:00Z"
        );
        assert!(message.body.contains("Original Docker action: health_status: unhealthy"));
        assert!(message.body.contains("Auto-restart: restart requested"));
    }
}
