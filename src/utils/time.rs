use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

/// Renders a time span the way the tracker screen shows it: `1h 15m` once there is at least an
/// hour, `25 minutes` below that.
pub fn format_span(span: Duration) -> String {
    let span = span.max(Duration::zero());
    let hours = span.num_hours();
    let minutes = span.num_minutes() % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes} minutes")
    }
}

/// Short relative description like `2 min ago`, used for "last active".
pub fn format_ago(moment: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - moment).max(Duration::zero());
    if elapsed.num_minutes() < 1 {
        "just now".into()
    } else if elapsed.num_hours() < 1 {
        format!("{} min ago", elapsed.num_minutes())
    } else if elapsed.num_days() < 1 {
        let hours = elapsed.num_hours();
        format!("{hours} hour{} ago", if hours == 1 { "" } else { "s" })
    } else {
        let days = elapsed.num_days();
        format!("{days} day{} ago", if days == 1 { "" } else { "s" })
    }
}

/// First moment of the day `now` falls on in `tz`. Falls back to a day before `now` when local
/// midnight doesn't exist.
pub fn start_of_day<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let today = now.with_timezone(tz).date_naive();
    tz.from_local_datetime(&today.and_time(NaiveTime::MIN))
        .earliest()
        .map(|v| v.with_timezone(&Utc))
        .unwrap_or(now - Duration::days(1))
}

/// Whether `moment` falls on `date` when seen from `tz`.
pub fn is_on_date<Tz: TimeZone>(moment: DateTime<Utc>, date: NaiveDate, tz: &Tz) -> bool {
    moment.with_timezone(tz).date_naive() == date
}
