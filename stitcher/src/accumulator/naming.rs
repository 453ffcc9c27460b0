use chrono::{NaiveDateTime, Timelike};
use line_stitch_common::config::NamingScheme;

/// File name for the `seq`-th composite written at local time `at`.
pub fn composite_file_name(scheme: NamingScheme, at: &NaiveDateTime, seq: u64) -> String {
    match scheme {
        NamingScheme::Timestamped => timestamped_name(at, seq),
        NamingScheme::Legacy => legacy_name(at),
    }
}

/// Collision-free name: full local timestamp to the millisecond plus a per-run sequence.
/// e.g. "composite_20261018T134455123_0003.png"
pub fn timestamped_name(at: &NaiveDateTime, seq: u64) -> String {
    format!(
        "composite_{ts}_{seq:04}.png",
        ts = at.format("%Y%m%dT%H%M%S%3f"),
    )
}

/// The name older captures were saved under: `{hour+1}_{minute+1}{second+1}.png`.
///
/// Each component is shifted by one and minute/second are run together without padding,
/// so 09:05:07 becomes "10_68.png". There is no date and no sequence, so two flushes in the
/// same second overwrite each other. Only use this to stay compatible with existing tooling.
pub fn legacy_name(at: &NaiveDateTime) -> String {
    format!(
        "{}_{}{}.png",
        at.hour() + 1,
        at.minute() + 1,
        at.second() + 1
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 18)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    #[test]
    fn timestamped_format() {
        let name = timestamped_name(&at(9, 30, 5, 42), 7);
        assert_eq!(name, "composite_20260218T093005042_0007.png");
    }

    #[test]
    fn timestamped_names_differ_within_one_second() {
        let t = at(23, 59, 59, 0);
        assert_ne!(timestamped_name(&t, 1), timestamped_name(&t, 2));
    }

    #[test]
    fn legacy_format_shifts_components() {
        assert_eq!(legacy_name(&at(9, 5, 7, 0)), "10_68.png");
        assert_eq!(legacy_name(&at(0, 0, 0, 0)), "1_11.png");
        assert_eq!(legacy_name(&at(23, 59, 59, 999)), "24_6060.png");
    }

    #[test]
    fn legacy_names_collide_within_one_second() {
        let a = composite_file_name(NamingScheme::Legacy, &at(12, 0, 0, 10), 1);
        let b = composite_file_name(NamingScheme::Legacy, &at(12, 0, 0, 900), 2);
        assert_eq!(a, b);
    }
}
