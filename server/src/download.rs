//! In-band file transfer and www redirect handling. Files go out in fixed
//! size blocks over a sliding window; the client acknowledges blocks with
//! `nextdl` and the window advances. A zero-length block marks the end of
//! the file.

use std::fs;
use std::io::Read;

use log::{debug, info, warn};

use crate::config::{PureMode, ServerConfig};
use crate::session::{ActiveDownload, ClientSlot, DLNOTIFY_BEGIN, DLNOTIFY_REDIRECT};
use shared::msg::MsgWriter;
use shared::{ServerOp, DL_FLAG_DISCON, DL_FLAG_URL, DOWNLOAD_BLOCK_SIZE, MAX_DOWNLOAD_WINDOW};

/// Outcome of a `nextdl` block acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    /// Window advanced, keep pumping.
    Advanced,
    /// The EOF block was acknowledged; transfer is finished.
    Completed,
    /// Acknowledged the wrong block; the transfer is unrecoverable.
    Broken,
}

/// Rejects traversal and anything that is not a pak the server serves.
pub fn is_legal_download(name: &str, cfg: &ServerConfig) -> bool {
    if name.is_empty() || name.contains("..") || name.contains(':') {
        return false;
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return false;
    }
    if !name.ends_with(".pk3") {
        return false;
    }
    cfg.pak_names.iter().any(|n| n == name)
}

/// Releases the file data and all pending window blocks.
pub fn close_download(cl: &mut ClientSlot) {
    cl.download = None;
    cl.download_name.clear();
}

/// Handles a client block acknowledgement.
pub fn acknowledge_block(cl: &mut ClientSlot, block: i32, now: i32) -> AckResult {
    let dl = match &mut cl.download {
        Some(dl) => dl,
        // stray ack with nothing in flight; treat like a finished transfer
        None => return AckResult::Completed,
    };

    if block != dl.client_block {
        return AckResult::Broken;
    }

    let index = (dl.client_block as usize) % MAX_DOWNLOAD_WINDOW;
    if dl.eof && dl.client_block < dl.current_block && dl.blocks[index].is_empty() {
        info!("download: file \"{}\" completed", cl.download_name);
        close_download(cl);
        return AckResult::Completed;
    }

    dl.send_time = now;
    dl.client_block += 1;
    AckResult::Advanced
}

fn write_refusal(w: &mut MsgWriter, message: &str) {
    w.write_u8(ServerOp::Download as u8);
    w.write_i16(0);
    w.write_i32(-1); // illegal size marks a refusal
    w.write_string(message);
}

fn write_redirect(w: &mut MsgWriter, url: &str, size: i32, flags: u32) {
    w.write_u8(ServerOp::Download as u8);
    w.write_i16(-1); // block -1 means fetch over http
    w.write_string(url);
    w.write_i32(size);
    w.write_u32(flags);
}

fn check_fallback_url(cl: &ClientSlot, cfg: &ServerConfig, w: &mut MsgWriter) -> bool {
    if cfg.www_fallback_url.is_empty() {
        return false;
    }
    info!(
        "download: sending '{}' to fallback URL '{}'",
        cl.name, cfg.www_fallback_url
    );
    write_redirect(w, &cfg.www_fallback_url, 0, DL_FLAG_URL);
    true
}

/// Opens the requested file if needed and fills `w` with as much download
/// traffic as the client's rate allows. `Err` carries a drop reason.
pub fn write_download(
    slot: usize,
    cl: &mut ClientSlot,
    cfg: &ServerConfig,
    now: i32,
    w: &mut MsgWriter,
) -> Result<(), String> {
    if cl.download_name.is_empty() {
        return Ok(()); // nothing requested
    }
    if cl.wwwing {
        return Ok(()); // client is fetching over http
    }

    if !is_legal_download(&cl.download_name, cfg) {
        return Err("illegal download request".to_string());
    }

    let mut announce_rate = false;

    if cl.download.is_none() {
        if cl.download_notify & DLNOTIFY_BEGIN != 0 {
            cl.download_notify &= !DLNOTIFY_BEGIN;
            info!("download: {} : beginning \"{}\"", slot, cl.download_name);
        }

        let official = cfg.official_paks.iter().any(|n| n == &cl.download_name);
        if !cfg.allow_download || official {
            let message = if official {
                info!(
                    "download: {} : \"{}\" cannot download official pak files",
                    slot, cl.download_name
                );
                format!(
                    "Cannot autodownload official pak file \"{}\"",
                    cl.download_name
                )
            } else {
                info!(
                    "download: {} : \"{}\" download disabled",
                    slot, cl.download_name
                );
                if cfg.pure_mode != PureMode::Off {
                    format!(
                        "Could not download \"{}\" because autodownloading is disabled on the server.\n\n\
                         You will need to get this file elsewhere before you \
                         can connect to this pure server.\n",
                        cl.download_name
                    )
                } else {
                    format!(
                        "Could not download \"{}\" because autodownloading is disabled on the server.\n\n\
                         Set autodownload to No in your settings and you might be \
                         able to connect even if you don't have the file.\n",
                        cl.download_name
                    )
                }
            };
            write_refusal(w, &message);
            cl.download_name.clear();
            return Ok(());
        }

        // redirected download, when both sides allow it
        if cfg.www_download {
            if cl.www_ok {
                if !cl.www_fallback {
                    let path = cfg.fs_base.join(&cl.download_name);
                    match fs::metadata(&path) {
                        Ok(meta) => {
                            let url = format!("{}/{}", cfg.www_base_url, cl.download_name);
                            if cl.download_notify & DLNOTIFY_REDIRECT != 0 {
                                cl.download_notify &= !DLNOTIFY_REDIRECT;
                                info!("download: redirecting '{}' to {}", cl.name, url);
                            }
                            cl.www_dl = true;
                            let mut flags = 0;
                            if cfg.www_dl_disconnected {
                                flags |= DL_FLAG_DISCON;
                            }
                            write_redirect(w, &url, meta.len() as i32, flags);
                            return Ok(());
                        }
                        Err(e) => {
                            warn!(
                                "download: couldn't stat {} for redirect: {}",
                                cl.download_name, e
                            );
                        }
                    }
                } else {
                    cl.www_fallback = false;
                    if check_fallback_url(cl, cfg, w) {
                        return Ok(());
                    }
                    info!(
                        "download: '{}' falling back to direct transfer for {}",
                        cl.name, cl.download_name
                    );
                }
            } else {
                if check_fallback_url(cl, cfg, w) {
                    return Ok(());
                }
                info!("download: '{}' is not configured for www download", cl.name);
            }
        }

        // direct transfer
        cl.www_dl = false;
        let path = cfg.fs_base.join(&cl.download_name);
        let opened = fs::File::open(&path)
            .and_then(|file| Ok((file.metadata()?.len() as usize, file)));
        match opened {
            Ok((size, file)) => {
                begin_transfer(cl, file, size);
                announce_rate = true;
            }
            Err(_) => {
                info!(
                    "download: {} : \"{}\" file not found on server",
                    slot, cl.download_name
                );
                let message = format!(
                    "File \"{}\" not found on server for autodownloading.\n",
                    cl.download_name
                );
                write_refusal(w, &message);
                cl.download_name.clear();
                return Ok(());
            }
        }
    }

    pump(slot, cl, cfg, now, announce_rate, w);
    Ok(())
}

/// Starts an in-band transfer from an open file of a known size.
pub fn begin_transfer(cl: &mut ClientSlot, file: fs::File, size: usize) {
    cl.download = Some(ActiveDownload {
        file,
        size,
        blocks: vec![Vec::new(); MAX_DOWNLOAD_WINDOW],
        current_block: 0,
        client_block: 0,
        xmit_block: 0,
        count: 0,
        eof: false,
        send_time: 0,
    });
}

/// Reads ahead into the free window slots, one block-sized read per slot,
/// and appends the zero-length terminator once the file is exhausted.
fn fill_window(dl: &mut ActiveDownload) -> std::io::Result<()> {
    while dl.current_block - dl.client_block < MAX_DOWNLOAD_WINDOW as i32 && dl.count != dl.size {
        let index = (dl.current_block as usize) % MAX_DOWNLOAD_WINDOW;
        let n = DOWNLOAD_BLOCK_SIZE.min(dl.size - dl.count);
        let mut block = vec![0u8; n];
        dl.file.read_exact(&mut block)?;
        dl.blocks[index] = block;
        dl.count += n;
        dl.current_block += 1;
    }

    if dl.count == dl.size
        && !dl.eof
        && dl.current_block - dl.client_block < MAX_DOWNLOAD_WINDOW as i32
    {
        let index = (dl.current_block as usize) % MAX_DOWNLOAD_WINDOW;
        dl.blocks[index] = Vec::new();
        dl.current_block += 1;
        dl.eof = true;
    }
    Ok(())
}

fn pump(
    slot: usize,
    cl: &mut ClientSlot,
    cfg: &ServerConfig,
    now: i32,
    announce_rate: bool,
    w: &mut MsgWriter,
) {
    let snapshot_msec = cl.snapshot_msec;
    let client_rate = cl.rate;
    let name = cl.name.clone();
    match &mut cl.download {
        Some(dl) => {
            if let Err(e) = fill_window(dl) {
                warn!(
                    "download: {} : read error in \"{}\": {}",
                    slot, cl.download_name, e
                );
                close_download(cl);
                return;
            }
        }
        None => return,
    }
    let dl = match &mut cl.download {
        Some(dl) => dl,
        None => return,
    };
    let size = dl.size;

    // clients may change their rate mid-transfer, recompute every pass
    let mut rate = client_rate;
    if cfg.download_max_rate < rate {
        rate = cfg.download_max_rate;
        if announce_rate {
            info!("download: '{}' capped to server rate {}", name, rate);
        }
    } else if announce_rate {
        info!("download: '{}' downloading at rate {}", name, rate);
    }

    let mut blocks_per_snap = if rate <= 0 {
        1
    } else {
        ((rate * snapshot_msec) / 1000 + DOWNLOAD_BLOCK_SIZE as i32) / DOWNLOAD_BLOCK_SIZE as i32
    };
    if blocks_per_snap < 1 {
        blocks_per_snap = 1;
    }

    while blocks_per_snap > 0 {
        blocks_per_snap -= 1;

        if dl.client_block == dl.current_block {
            return; // nothing windowed to transmit
        }
        if dl.xmit_block == dl.current_block {
            // whole window on the wire; retransmit after a second of silence
            if now - dl.send_time > 1000 {
                dl.xmit_block = dl.client_block;
            } else {
                return;
            }
        }

        let index = (dl.xmit_block as usize) % MAX_DOWNLOAD_WINDOW;
        w.write_u8(ServerOp::Download as u8);
        w.write_i16(dl.xmit_block as i16);
        if dl.xmit_block == 0 {
            w.write_i32(size as i32);
        }
        w.write_u16(dl.blocks[index].len() as u16);
        if !dl.blocks[index].is_empty() {
            w.write_data(&dl.blocks[index]);
        }

        debug!("download: {} : writing block {}", slot, dl.xmit_block);
        dl.xmit_block += 1;
        dl.send_time = now;
    }
}
