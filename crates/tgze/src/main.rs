use std::sync::Arc;

use tgze_core::{
    commands::CommandTable,
    config::Config,
    dispatcher::UpdateDispatcher,
    links::LinkExtractor,
    playlist::{PlaylistResolver, YoutubeDataApi},
    ports::{ChatTransport, Transcoder, VideoSource},
    relay::{MediaRelay, RelayOptions},
    state::AppState,
    store::{DocumentStore, RemoteStore},
    transcode::EncoderConfig,
};
use tgze_ffmpeg::FfmpegTranscoder;
use tgze_telegram::TelegramTransport;
use tgze_ytdlp::YtDlpSource;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), tgze_core::Error> {
    let cfg = Config::load()?;

    // Settings (including the DEBUG flag) live in the remote document.
    let store = Arc::new(RemoteStore::new(cfg.store_url.clone())?);
    let doc = store.get().await?;
    tgze_core::logging::init("tgze", doc.settings.debug)?;

    let settings = doc.settings.clone();
    settings.validate()?;
    info!(
        ledger = doc.update_log.len(),
        channels = doc.channel_ids.len(),
        temp_dir = %cfg.temp_dir.display(),
        "document loaded"
    );

    let transport = Arc::new(TelegramTransport::new(
        &settings.tg_token,
        &settings.tg_api_url_base,
    )?);
    let chat: Arc<dyn ChatTransport> = transport.clone();

    let playlists = PlaylistResolver::new(Arc::new(
        YoutubeDataApi::new(settings.yt_key.clone(), settings.yt_max_results)?
            .with_debug(settings.debug),
    ));
    let source: Arc<dyn VideoSource> = Arc::new(YtDlpSource::new(
        settings.yt_dlp_path.clone(),
        settings.yt_http_client_user_agent.clone(),
    )?);
    let transcoder: Option<Arc<dyn Transcoder>> = match settings.ffmpeg_path() {
        Some(program) => Some(Arc::new(FfmpegTranscoder::new(EncoderConfig {
            program,
            global_options: settings.ffmpeg_global_options.clone(),
        }))),
        None => {
            warn!("FfmpegPath is empty, oversized media will be rejected");
            None
        }
    };

    let relay = MediaRelay::new(
        LinkExtractor::from_settings(&settings)?,
        playlists,
        source,
        transcoder,
        chat.clone(),
        cfg.temp_dir.clone(),
        RelayOptions::from_settings(&settings),
    );
    let dispatcher = UpdateDispatcher::new(
        AppState::from_document(doc),
        store as Arc<dyn DocumentStore>,
        chat,
        relay,
        CommandTable::from_settings(&settings),
    );

    tgze_telegram::router::run_polling(dispatcher, transport)
        .await
        .map_err(|e| tgze_core::Error::External(format!("relay stopped: {e}")))?;

    Ok(())
}
