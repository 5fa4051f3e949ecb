// Configuration resolution from environment variables.
//
// All cases run inside a single test because the process environment is
// shared between test threads.

use rds_guard::config::Config;

fn clear_env() {
    for key in [
        "FM_FREQUENCY",
        "FM_FREQUENCIES",
        "RTL_CENTER_FREQ",
        "EVENT_RETENTION_DAYS",
        "MQTT_ENABLED",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn config_resolution() {
    clear_env();

    // Defaults: single station at 103.5 MHz.
    let cfg = Config::from_env().unwrap();
    assert!(!cfg.multi_station());
    assert_eq!(cfg.frequencies_hz, vec![103_500_000]);
    assert_eq!(cfg.center_freq_hz, 103_500_000);
    assert_eq!(cfg.retention_days, 30);
    assert_eq!(cfg.max_recording_sec, 600);
    assert_eq!(cfg.min_recording_sec, 2);
    assert_eq!(cfg.alert_hold_timeout_sec, 120);

    // Two stations: multi mode, center at the midpoint.
    std::env::set_var("FM_FREQUENCIES", "103.5M,102.9M");
    let cfg = Config::from_env().unwrap();
    assert!(cfg.multi_station());
    assert_eq!(cfg.frequencies_hz, vec![103_500_000, 102_900_000]);
    assert_eq!(cfg.center_freq_hz, 102_900_000 + 300_000);

    // 1.99 MHz span is accepted.
    std::env::set_var("FM_FREQUENCIES", "100.0M,101.99M");
    assert!(Config::from_env().is_ok());

    // 2.01 MHz span fails with a message naming the span.
    std::env::set_var("FM_FREQUENCIES", "100.0M,102.01M");
    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("span"), "{err}");

    // 3.0 MHz span fails as well.
    std::env::set_var("FM_FREQUENCIES", "100.0M,103.0M");
    assert!(Config::from_env().is_err());

    // More than four stations is rejected.
    std::env::set_var("FM_FREQUENCIES", "100.0M,100.2M,100.4M,100.6M,100.8M");
    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("maximum is 4"), "{err}");

    // Explicit center frequency override.
    std::env::set_var("FM_FREQUENCIES", "103.5M,102.9M");
    std::env::set_var("RTL_CENTER_FREQ", "103.2M");
    let cfg = Config::from_env().unwrap();
    assert_eq!(cfg.center_freq_hz, 103_200_000);

    clear_env();
}
