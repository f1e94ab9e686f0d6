use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    wake: Wake,
    session: Session,
    audio: Audio,
    network: Network,
    voice: Voice,
}

#[derive(Deserialize)]
struct Wake {
    keywords: String,
    confidence_threshold: f32,
    record_ms: u64,
    boost_phrase: String,
}

#[derive(Deserialize)]
struct Session {
    exit_phrase: String,
    exit_after_phrase: bool,
    turn_debounce_ms: u64,
    user_id: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    sample_rate: u32,
    frame_size: usize,
}

#[derive(Deserialize)]
struct Network {
    conv_url: String,
    stt_url: String,
    credentials_file: String,
}

#[derive(Deserialize)]
struct Voice {
    name: String,
    response_format: String,
    latitude: f64,
    longitude: f64,
}

// Read config.toml at compile time and bake it into env vars.
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // Wake detection
    println!("cargo:rustc-env=WAKE_KEYWORDS={}", config.wake.keywords);
    println!(
        "cargo:rustc-env=WAKE_CONFIDENCE_THRESHOLD={}",
        config.wake.confidence_threshold
    );
    println!("cargo:rustc-env=WAKE_RECORD_MS={}", config.wake.record_ms);
    println!("cargo:rustc-env=WAKE_BOOST_PHRASE={}", config.wake.boost_phrase);

    // Session behavior
    println!("cargo:rustc-env=EXIT_PHRASE={}", config.session.exit_phrase);
    println!(
        "cargo:rustc-env=EXIT_AFTER_PHRASE={}",
        config.session.exit_after_phrase
    );
    println!(
        "cargo:rustc-env=TURN_DEBOUNCE_MS={}",
        config.session.turn_debounce_ms
    );
    println!("cargo:rustc-env=USER_ID={}", config.session.user_id);

    // Audio devices
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=FRAME_SIZE={}", config.audio.frame_size);

    // Remote services
    println!("cargo:rustc-env=CONV_URL={}", config.network.conv_url);
    println!("cargo:rustc-env=STT_URL={}", config.network.stt_url);
    println!(
        "cargo:rustc-env=CREDENTIALS_FILE={}",
        config.network.credentials_file
    );

    // Response voice options
    println!("cargo:rustc-env=VOICE_NAME={}", config.voice.name);
    println!(
        "cargo:rustc-env=RESPONSE_FORMAT={}",
        config.voice.response_format
    );
    println!("cargo:rustc-env=GEO_LATITUDE={}", config.voice.latitude);
    println!("cargo:rustc-env=GEO_LONGITUDE={}", config.voice.longitude);
}
