use pretty_assertions::assert_eq;
use wayback_core::{Timestamp, TimestampFormat};

#[test]
fn equivalent_inputs_canonicalize_identically() {
    let forms = [
        "20070221",
        "20070221000000",
        "2007-02-21",
        "2007-02-21T00:00:00",
        "2007-02-21T00:00:00Z",
        "2007-02-21 00:00:00",
        "2007-02-21T01:00:00+01:00",
        "1172016000",
    ];
    for form in forms {
        let ts = Timestamp::parse(form).unwrap_or_else(|err| panic!("{form}: {err}"));
        assert_eq!(ts.to_string(), "20070221000000", "input {form}");
    }
}

#[test]
fn full_datetime_and_epoch_agree_to_the_second() {
    let compact = Timestamp::parse("20070226101530").unwrap();
    let epoch = Timestamp::parse(&compact.unix_seconds().to_string()).unwrap();
    let iso = Timestamp::parse("2007-02-26T10:15:30Z").unwrap();
    assert_eq!(compact, epoch);
    assert_eq!(compact, iso);
}

#[test]
fn file_name_formats() {
    let ts = Timestamp::parse("20070221").unwrap();
    assert_eq!(ts.format(TimestampFormat::Compact), "20070221000000");
    assert_eq!(ts.format(TimestampFormat::Unix), "1172016000");
}

#[test]
fn ordering_follows_time() {
    let earlier = Timestamp::parse("20070221").unwrap();
    let later = Timestamp::parse("20070226").unwrap();
    assert!(earlier < later);
    assert!(Timestamp::earliest() < earlier);
    assert!(later < Timestamp::latest());
}
