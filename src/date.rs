//! Clocks for the `Date` header

use chrono::{DateTime, Utc};

/// Supplies the value of the `Date` header the generator injects
pub trait DateGenerator {
    fn date(&self) -> String;
}

/// Formats a timestamp the way RFC 7231 wants it (IMF-fixdate)
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// The wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDateGenerator;

impl DateGenerator for SystemDateGenerator {
    fn date(&self) -> String {
        format_http_date(Utc::now())
    }
}

/// Always answers with the same date; handy for reproducible output
#[derive(Debug, Clone)]
pub struct FixedDateGenerator(pub String);

impl DateGenerator for FixedDateGenerator {
    fn date(&self) -> String {
        self.0.clone()
    }
}

#[test]
fn formats_imf_fixdate() {
    use chrono::TimeZone;

    let time = Utc.with_ymd_and_hms(2016, 4, 7, 20, 42, 43).unwrap();
    assert_eq!(format_http_date(time), "Thu, 07 Apr 2016 20:42:43 GMT");
}
