use std::path::PathBuf;
use std::time::Duration;

use pretty_assertions::assert_eq;
use wayback_core::{ConfigError, MirrorConfig, RawOptions, TimestampFormat};

fn options(seeds: &[&str]) -> RawOptions {
    RawOptions {
        seeds: seeds.iter().map(|s| s.to_string()).collect(),
        output_dir: PathBuf::from("out"),
        concurrency: 10.0,
        ..RawOptions::default()
    }
}

#[test]
fn bare_domains_become_http_seeds() {
    let config = MirrorConfig::from_options(options(&["example.com", "https://example.org/start"])).unwrap();
    let seeds: Vec<_> = config.seeds.iter().map(|u| u.as_str()).collect();
    assert_eq!(seeds, vec!["http://example.com/", "https://example.org/start"]);
    assert_eq!(config.timestamp_format, TimestampFormat::Compact);
    assert_eq!(config.index_timeout, Duration::from_secs(30));
}

#[test]
fn overrides_are_applied() {
    let config = MirrorConfig::from_options(RawOptions {
        unix_timestamps: true,
        concurrency: 0.5,
        from: Some("2007".to_string()),
        to: Some("2008-06-01".to_string()),
        fetch_timeout: Some(Duration::from_secs(5)),
        ..options(&["example.com"])
    })
    .unwrap();

    assert_eq!(config.timestamp_format, TimestampFormat::Unix);
    assert_eq!(config.throttle_settings().target_concurrency, 0.5);
    assert_eq!(config.fetch_timeout, Duration::from_secs(5));
    assert_eq!(config.filter.range.from().to_string(), "20070101000000");
    assert_eq!(config.filter.range.to().to_string(), "20080601000000");
}

#[test]
fn invalid_options_are_fatal() {
    assert!(matches!(
        MirrorConfig::from_options(options(&[])),
        Err(ConfigError::NoSeeds)
    ));
    assert!(matches!(
        MirrorConfig::from_options(RawOptions {
            concurrency: 0.0,
            ..options(&["example.com"])
        }),
        Err(ConfigError::Concurrency(_))
    ));
    assert!(matches!(
        MirrorConfig::from_options(options(&["ftp://example.com"])),
        Err(ConfigError::InvalidSeed { .. })
    ));
    assert!(matches!(
        MirrorConfig::from_options(RawOptions {
            from: Some("not-a-date".to_string()),
            ..options(&["example.com"])
        }),
        Err(ConfigError::Timestamp { field: "from", .. })
    ));
    assert!(matches!(
        MirrorConfig::from_options(RawOptions {
            deny: Some("[".to_string()),
            ..options(&["example.com"])
        }),
        Err(ConfigError::Pattern { field: "deny", .. })
    ));
}
