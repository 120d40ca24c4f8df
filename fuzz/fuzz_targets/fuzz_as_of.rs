#![no_main]

use arbitrary::Arbitrary;
use chrono::{DateTime, Utc};
use eventscope_core::entities::AsOf;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    text: Option<&'a str>,
    now_millis: i64,
}

fuzz_target!(|input: Input<'_>| {
    let now = DateTime::<Utc>::from_timestamp_millis(input.now_millis).unwrap_or_else(Utc::now);

    // Never panics, and a normalized value normalizes to itself.
    let first = AsOf::normalize_at(input.text, now).to_string();
    let second = AsOf::normalize_at(Some(&first), now).to_string();
    assert_eq!(first, second);
});
