//! Inbound photo handling: download via `get_file`, size-guard, and
//! base64-encode for the vision turn.

use base64::Engine;
use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::warn;

/// A downloaded photo ready for the LLM pipeline.
pub struct PhotoPayload {
    pub base64: String,
    pub media_type: String,
}

/// Download the highest-resolution rendition of a photo message.
///
/// Returns `None` when the message has no photo, the file exceeds
/// `max_bytes`, or the download fails.
pub async fn download_photo(bot: &Bot, msg: &Message, max_bytes: u64) -> Option<PhotoPayload> {
    let photo = msg.photo()?.last()?;

    let file = match bot.get_file(&photo.file.id).await {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "get_file failed");
            return None;
        }
    };

    if u64::from(file.size) > max_bytes {
        warn!(size = file.size, limit = max_bytes, "photo exceeds size limit");
        return None;
    }

    let mut buf: Vec<u8> = Vec::new();
    if let Err(e) = bot.download_file(&file.path, &mut buf).await {
        warn!(error = %e, "download_file failed");
        return None;
    }

    Some(PhotoPayload {
        base64: base64::engine::general_purpose::STANDARD.encode(&buf),
        // Telegram re-encodes photos as JPEG.
        media_type: "image/jpeg".to_string(),
    })
}
