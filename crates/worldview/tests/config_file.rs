use std::fs;
use std::time::Duration;

use tempfile::TempDir;
use worldview::config::ConfigError;
use worldview::{CompositorConfig, Easing, FrameDrive, NamedColorSpace, ScaleMode};

#[test]
fn loads_a_full_config_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("worldview.toml");
    fs::write(
        &path,
        r#"
[card]
width = 1024
height = 768
clear_color = [0.1, 0.1, 0.1, 1.0]

[display]
refresh_rate = 120.0
drive = "display-link"
scale_mode = "fill"

[color]
working = "display-p3"
fallback = "srgb"

[quality]
prefer_color_management = true
min_color_managed_vram_mib = 512
min_api_version = "3.3"
required_extensions = ["TEXTURE_COMPRESSION_BC"]

[fade]
duration = "1s 500ms"
easing = "ease-in-out"
"#,
    )
    .unwrap();

    let config = CompositorConfig::load(&path).unwrap();
    assert_eq!(config.card.size().width, 1024);
    assert_eq!(config.display.drive, FrameDrive::DisplayLink);
    assert_eq!(config.display.scale_mode, ScaleMode::Fill);
    assert_eq!(
        config.display.refresh_interval(),
        Some(Duration::from_secs_f64(1.0 / 120.0))
    );
    assert_eq!(config.color.working, NamedColorSpace::DisplayP3);
    assert_eq!(config.quality.hints().min_color_managed_memory, 512 << 20);
    assert_eq!(config.quality.floor().min_api_version, Some((3, 3)));
    assert_eq!(config.fade.duration, Duration::from_millis(1500));
    assert_eq!(config.fade.easing, Easing::EaseInOut);
}

#[test]
fn missing_file_reports_the_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    let err = CompositorConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn saved_config_reloads_identically() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("saved.toml");
    let mut config = CompositorConfig::default();
    config.fade.duration = Duration::from_millis(750);
    config.quality.min_api_version = Some((4, 1));
    fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

    assert_eq!(CompositorConfig::load(&path).unwrap(), config);
}
