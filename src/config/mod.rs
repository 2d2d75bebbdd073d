use std::{env, fmt, net::SocketAddr, path::PathBuf, str::FromStr};

use anyhow::{Context, bail};

use crate::{camera::traits::CaptureSettings, robot::motor::MotorPins};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraBackendKind {
    Ffmpeg,
    TestPattern,
}

impl FromStr for CameraBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ffmpeg" | "v4l2" => Ok(Self::Ffmpeg),
            "test-pattern" | "test_pattern" | "pattern" => Ok(Self::TestPattern),
            other => bail!("unknown camera backend {other:?} (expected ffmpeg or test-pattern)"),
        }
    }
}

impl fmt::Display for CameraBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ffmpeg => "ffmpeg",
            Self::TestPattern => "test-pattern",
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub bind_addr: SocketAddr,
    pub static_dir: PathBuf,
    pub log_dir: PathBuf,
    pub camera_backend: CameraBackendKind,
    pub camera_device: String,
    pub camera_input_format: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub target_fps: u32,
    pub jpeg_quality: u8,
    pub left_motor_pins: MotorPins,
    pub right_motor_pins: MotorPins,
    /// Settings that were present but unusable and fell back to defaults.
    /// Read before logging is up, so `main` reports them afterwards.
    pub fallbacks: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let capture = CaptureSettings::default();
        Self {
            app_name: "robolink".to_owned(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            static_dir: PathBuf::from("static"),
            log_dir: PathBuf::from("logs"),
            camera_backend: CameraBackendKind::Ffmpeg,
            camera_device: "/dev/video0".to_owned(),
            camera_input_format: "mjpeg".to_owned(),
            frame_width: capture.width,
            frame_height: capture.height,
            target_fps: capture.target_fps,
            jpeg_quality: capture.jpeg_quality,
            left_motor_pins: MotorPins::new(17, 27, 4),
            right_motor_pins: MotorPins::new(5, 6, 13),
            fallbacks: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let app_name = env::var("APP_NAME").unwrap_or(defaults.app_name);
        let bind_addr = match env::var("BIND_ADDR") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("BIND_ADDR {raw:?} is not a socket address"))?,
            Err(_) => defaults.bind_addr,
        };
        let static_dir = env::var("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.static_dir);
        let log_dir = env::var("LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.log_dir);

        let camera_backend = match env::var("CAMERA_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.camera_backend,
        };
        let camera_device = env::var("CAMERA_DEVICE").unwrap_or(defaults.camera_device);
        let camera_input_format =
            env::var("CAMERA_INPUT_FORMAT").unwrap_or(defaults.camera_input_format);

        let mut fallbacks = Vec::new();
        let frame_width =
            numeric_or(&mut fallbacks, "FRAME_WIDTH", defaults.frame_width, |v: &u32| *v > 0);
        let frame_height =
            numeric_or(&mut fallbacks, "FRAME_HEIGHT", defaults.frame_height, |v: &u32| *v > 0);
        let target_fps =
            numeric_or(&mut fallbacks, "TARGET_FPS", defaults.target_fps, |v: &u32| *v > 0);
        let jpeg_quality =
            numeric_or(&mut fallbacks, "JPEG_QUALITY", defaults.jpeg_quality, |v: &u8| {
                (1..=100).contains(v)
            });

        let left_motor_pins = pins_or("LEFT_MOTOR_PINS", defaults.left_motor_pins)?;
        let right_motor_pins = pins_or("RIGHT_MOTOR_PINS", defaults.right_motor_pins)?;

        Ok(Self {
            app_name,
            bind_addr,
            static_dir,
            log_dir,
            camera_backend,
            camera_device,
            camera_input_format,
            frame_width,
            frame_height,
            target_fps,
            jpeg_quality,
            left_motor_pins,
            right_motor_pins,
            fallbacks,
        })
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            width: self.frame_width,
            height: self.frame_height,
            target_fps: self.target_fps,
            jpeg_quality: self.jpeg_quality,
        }
    }
}

/// Reads a numeric variable, keeping the default when it is unset, does not
/// parse, or is out of range. Rejected values are noted in `fallbacks`.
fn numeric_or<T>(
    fallbacks: &mut Vec<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T
where
    T: FromStr + Copy + fmt::Display,
{
    let Ok(raw) = env::var(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            fallbacks.push(format!("{key}={raw:?} is invalid, using {default}"));
            default
        }
    }
}

fn pins_or(key: &str, default: MotorPins) -> anyhow::Result<MotorPins> {
    match env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("{key} is invalid")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::PathBuf,
        sync::{Mutex, OnceLock},
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::{AppConfig, CameraBackendKind};
    use crate::robot::motor::MotorPins;

    const KEYS: &[&str] = &[
        "APP_NAME",
        "BIND_ADDR",
        "CAMERA_BACKEND",
        "FRAME_WIDTH",
        "FRAME_HEIGHT",
        "TARGET_FPS",
        "JPEG_QUALITY",
        "LEFT_MOTOR_PINS",
        "RIGHT_MOTOR_PINS",
    ];

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        let guard = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for key in KEYS {
            remove_env(key);
        }
        guard
    }

    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    #[test]
    fn from_env_falls_back_to_defaults() {
        let _guard = lock_env();

        let config = AppConfig::from_env().expect("config should parse");
        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.camera_backend, CameraBackendKind::Ffmpeg);
        assert_eq!(config.frame_width, 480);
        assert_eq!(config.target_fps, 60);
        assert_eq!(config.jpeg_quality, 65);
        assert_eq!(config.left_motor_pins, MotorPins::new(17, 27, 4));
        assert_eq!(config.right_motor_pins, MotorPins::new(5, 6, 13));
        assert!(config.fallbacks.is_empty());
    }

    #[test]
    fn from_env_reads_overrides() {
        let _guard = lock_env();
        set_env("BIND_ADDR", "127.0.0.1:9000");
        set_env("CAMERA_BACKEND", "test-pattern");
        set_env("TARGET_FPS", "15");
        set_env("LEFT_MOTOR_PINS", "22, 23, 24");

        let config = AppConfig::from_env().expect("config should parse");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.camera_backend, CameraBackendKind::TestPattern);
        assert_eq!(config.capture_settings().target_fps, 15);
        assert_eq!(config.left_motor_pins, MotorPins::new(22, 23, 24));
    }

    #[test]
    fn invalid_numbers_keep_defaults() {
        let _guard = lock_env();
        set_env("FRAME_WIDTH", "wide");
        set_env("TARGET_FPS", "0");
        set_env("JPEG_QUALITY", "180");

        let config = AppConfig::from_env().expect("config should parse");
        assert_eq!(config.frame_width, 480);
        assert_eq!(config.target_fps, 60);
        assert_eq!(config.jpeg_quality, 65);

        assert_eq!(config.fallbacks.len(), 3);
        assert!(config.fallbacks.iter().any(|note| note.starts_with("TARGET_FPS=\"0\"")));
        assert!(config.fallbacks.iter().any(|note| note.contains("using 65")));
    }

    #[test]
    fn malformed_addresses_and_pins_are_rejected() {
        let _guard = lock_env();
        set_env("BIND_ADDR", "localhost");
        assert!(AppConfig::from_env().is_err());

        remove_env("BIND_ADDR");
        set_env("RIGHT_MOTOR_PINS", "5,6");
        let err = AppConfig::from_env().expect_err("two pins are not enough");
        assert!(format!("{err:#}").contains("RIGHT_MOTOR_PINS"));

        remove_env("RIGHT_MOTOR_PINS");
        set_env("CAMERA_BACKEND", "webcam");
        assert!(AppConfig::from_env().is_err());
    }

    #[test]
    fn from_env_reads_values_from_dotenv_file() {
        let _guard = lock_env();

        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let path: PathBuf = std::env::temp_dir().join(format!("robolink-dotenv-{suffix}.env"));
        fs::write(&path, "APP_NAME=garage-rover\nJPEG_QUALITY=80\n")
            .expect("should write temporary dotenv file");

        dotenvy::from_path_override(&path).expect("dotenv file should load");
        let config = AppConfig::from_env().expect("config should parse");
        assert_eq!(config.app_name, "garage-rover");
        assert_eq!(config.jpeg_quality, 80);

        remove_env("APP_NAME");
        remove_env("JPEG_QUALITY");
        let _ = fs::remove_file(path);
    }
}
