use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};

#[derive(Debug, Clone)]
pub(crate) struct DailyCadence {
    tz: FixedOffset,
    target: NaiveTime,
}

impl DailyCadence {
    pub(crate) fn new(tz: FixedOffset, target: NaiveTime) -> Self {
        Self { tz, target }
    }

    /// `now` 以降で最初に訪れる起動時刻。ちょうど起動時刻なら `now` を返す。
    pub(crate) fn next_run_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let localized_now = now.with_timezone(&self.tz);
        let mut date = localized_now.date_naive();
        if localized_now.time() > self.target {
            date = date.succ_opt()?;
        }

        // 固定オフセットでは曖昧・欠落時刻は発生しない
        self.tz
            .from_local_datetime(&date.and_time(self.target))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}
