#[derive(Debug, Clone)]
pub struct Config {
    // Wake detection
    pub wake_keywords: &'static str,
    pub wake_confidence_threshold: f32,
    pub wake_record_ms: u64,
    pub wake_boost_phrase: &'static str,

    // Session behavior
    pub exit_phrase: &'static str,
    pub exit_after_phrase: bool,
    pub turn_debounce_ms: u64,
    // 动态部分，可在运行时修改 (MAC/UUID fallback)
    pub user_id: String,

    // Audio devices
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub sample_rate: u32,
    pub frame_size: usize,

    // Remote services
    pub conv_url: &'static str,
    pub stt_url: &'static str,
    pub credentials_file: &'static str,

    // Response voice options
    pub voice_name: &'static str,
    pub response_format: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// All values are baked in from config.toml by build.rs.
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            wake_keywords: env!("WAKE_KEYWORDS"),
            wake_confidence_threshold: env!("WAKE_CONFIDENCE_THRESHOLD")
                .parse()
                .map_err(|_| "Failed to parse WAKE_CONFIDENCE_THRESHOLD")?,
            wake_record_ms: env!("WAKE_RECORD_MS")
                .parse()
                .map_err(|_| "Failed to parse WAKE_RECORD_MS")?,
            wake_boost_phrase: env!("WAKE_BOOST_PHRASE"),

            exit_phrase: env!("EXIT_PHRASE"),
            exit_after_phrase: env!("EXIT_AFTER_PHRASE")
                .parse()
                .map_err(|_| "Failed to parse EXIT_AFTER_PHRASE")?,
            turn_debounce_ms: env!("TURN_DEBOUNCE_MS")
                .parse()
                .map_err(|_| "Failed to parse TURN_DEBOUNCE_MS")?,
            user_id: env!("USER_ID").to_string(),

            capture_device: env!("CAPTURE_DEVICE"),
            playback_device: env!("PLAYBACK_DEVICE"),
            sample_rate: env!("SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse SAMPLE_RATE")?,
            frame_size: env!("FRAME_SIZE")
                .parse()
                .map_err(|_| "Failed to parse FRAME_SIZE")?,

            conv_url: env!("CONV_URL"),
            stt_url: env!("STT_URL"),
            credentials_file: env!("CREDENTIALS_FILE"),

            voice_name: env!("VOICE_NAME"),
            response_format: env!("RESPONSE_FORMAT"),
            latitude: env!("GEO_LATITUDE")
                .parse()
                .map_err(|_| "Failed to parse GEO_LATITUDE")?,
            longitude: env!("GEO_LONGITUDE")
                .parse()
                .map_err(|_| "Failed to parse GEO_LONGITUDE")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}
