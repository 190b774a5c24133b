use std::sync::Arc;
use std::time::Duration;

use inbox_courier::api::{ApiState, api_routes};
use inbox_courier::config::{DigestConfig, SpeechConfig, TelephonyConfig, VerifyConfig};
use inbox_courier::digest::DigestGenerator;
use inbox_courier::dispatch::ChannelDispatcher;
use inbox_courier::providers::{ElevenLabsAdapter, TwilioAdapter};
use inbox_courier::store::{Database, LibSqlBackend};
use inbox_courier::verify::VerificationSessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; COURIER_LOG_DIR switches output to a daily file.
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let _log_guard = match std::env::var("COURIER_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-courier.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    // Telephony credentials are required.
    let account_sid = std::env::var("TWILIO_ACCOUNT_SID").unwrap_or_else(|_| {
        eprintln!("Error: TWILIO_ACCOUNT_SID not set");
        std::process::exit(1);
    });
    let auth_token = std::env::var("TWILIO_AUTH_TOKEN").unwrap_or_else(|_| {
        eprintln!("Error: TWILIO_AUTH_TOKEN not set");
        std::process::exit(1);
    });
    let from_number = std::env::var("COURIER_FROM_NUMBER").unwrap_or_else(|_| {
        eprintln!("Error: COURIER_FROM_NUMBER not set (E.164 source number)");
        std::process::exit(1);
    });
    let whatsapp_from =
        std::env::var("COURIER_WHATSAPP_FROM").unwrap_or_else(|_| from_number.clone());

    // Speech is optional — without a key the voice channel degrades to
    // the provider-native default voice.
    let speech_key = std::env::var("ELEVENLABS_API_KEY").unwrap_or_default();
    if speech_key.is_empty() {
        tracing::warn!("ELEVENLABS_API_KEY not set; voice dispatch will use the default voice");
    }

    let port: u16 = std::env::var("COURIER_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    let code_ttl_min: u64 = std::env::var("COURIER_CODE_TTL_MIN")
        .unwrap_or_else(|_| "5".to_string())
        .parse()
        .unwrap_or(5);

    eprintln!("📮 Inbox Courier v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{port}/api");
    eprintln!("   From number: {from_number}");

    // ── Database ─────────────────────────────────────────────────────
    let db_path = std::env::var("COURIER_DB_PATH")
        .unwrap_or_else(|_| "./data/inbox-courier.db".to_string());
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {db_path}: {e}");
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {db_path}");

    // ── Providers ────────────────────────────────────────────────────
    let mut telephony_config = TelephonyConfig::new(
        account_sid,
        secrecy::SecretString::from(auth_token),
    );
    telephony_config.from_number = from_number;
    telephony_config.whatsapp_from = whatsapp_from;
    let telephony = Arc::new(TwilioAdapter::new(telephony_config));

    let mut speech_config = SpeechConfig::new(secrecy::SecretString::from(speech_key));
    if let Ok(voice) = std::env::var("COURIER_DEFAULT_VOICE") {
        speech_config.default_voice_id = voice;
    }
    let default_voice_id = speech_config.default_voice_id.clone();
    let speech = Arc::new(ElevenLabsAdapter::new(speech_config));

    // ── Core components ──────────────────────────────────────────────
    let verify_config = VerifyConfig {
        code_ttl: Duration::from_secs(code_ttl_min * 60),
        ..Default::default()
    };
    let verifier = Arc::new(VerificationSessionManager::new(
        telephony.clone(),
        verify_config,
    ));

    let digest_config = DigestConfig::default();
    let generator = Arc::new(DigestGenerator::new(
        Arc::clone(&db),
        digest_config.clone(),
    ));
    let dispatcher = Arc::new(ChannelDispatcher::new(
        Arc::clone(&db),
        telephony,
        speech,
        Arc::clone(&verifier),
        default_voice_id,
    ));

    // Periodic TTL sweep for stale verification sessions.
    {
        let verifier = Arc::clone(&verifier);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let dropped = verifier.sweep().await;
                if dropped > 0 {
                    tracing::debug!(dropped, "Swept stale verification sessions");
                }
            }
        });
    }

    // ── Serve ────────────────────────────────────────────────────────
    let state = ApiState {
        db,
        generator,
        verifier,
        dispatcher,
        digest_config,
    };
    let app = api_routes(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "Listening");
    axum::serve(listener, app).await?;
    Ok(())
}
