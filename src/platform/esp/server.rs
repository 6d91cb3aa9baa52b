//! HTTP control surface and the WebSocket streaming sink.
//!
//! | Route           | Effect                                               |
//! |-----------------|------------------------------------------------------|
//! | `GET /ws`       | WebSocket; a text message binds the sender as client |
//! | `POST /system`  | Replace settings, respond with metadata JSON         |
//! | `POST /restart` | Reboot                                               |

use esp_idf_svc::http::server::ws::EspHttpWsDetachedSender;
use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer, Request};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::{EspIOError, Read, Write};
use esp_idf_svc::sys::EspError;
use esp_idf_svc::ws::FrameType;

use vradar_firmware::consumer::{FrameSink, SendError};

use super::{Radar, CLOCK};

/// Largest accepted `/system` body.
const MAX_BODY: usize = 1024;

/// Largest accepted inbound WebSocket message.
const MAX_WS_MESSAGE: usize = 256;

/// Asynchronous sender bound to one WebSocket session.
pub struct WsSink(EspHttpWsDetachedSender);

impl WsSink {
    fn send(&mut self, frame_type: FrameType, payload: &[u8]) -> Result<(), SendError> {
        if self.0.is_closed() {
            return Err(SendError::Closed);
        }
        self.0
            .send(frame_type, payload)
            .map_err(|e| SendError::Io(e.code()))
    }
}

impl FrameSink for WsSink {
    fn send_binary(&mut self, frame: &[u8]) -> Result<(), SendError> {
        self.send(FrameType::Binary(false), frame)
    }

    fn send_text(&mut self, text: &str) -> Result<(), SendError> {
        self.send(FrameType::Text(false), text.as_bytes())
    }
}

fn read_body(req: &mut Request<&mut EspHttpConnection<'_>>, buf: &mut [u8]) -> Result<usize, EspIOError> {
    let mut len = 0;
    while len < buf.len() {
        match req.read(&mut buf[len..])? {
            0 => break,
            n => len += n,
        }
    }
    Ok(len)
}

/// Start the server and register every route.
///
/// The returned server must be kept alive.
pub fn start(radar: &'static Radar) -> Result<EspHttpServer<'static>, EspError> {
    let mut server = EspHttpServer::new(&Configuration::default())?;

    server.fn_handler("/system", Method::Post, move |mut req| -> Result<(), EspIOError> {
        let mut body = [0u8; MAX_BODY];
        let len = read_body(&mut req, &mut body)?;

        if let Err(e) = radar.apply_settings_json(&body[..len], &CLOCK) {
            log::warn!("POST /system rejected: {}", e);
            let mut resp = req.into_response(400, Some("Bad Request"), &[])?;
            resp.write_all(e.to_string().as_bytes())?;
            return Ok(());
        }

        match radar.metadata_json(&CLOCK) {
            Ok(json) => {
                let mut resp = req.into_response(200, None, &[("Content-Type", "application/json")])?;
                resp.write_all(json.as_bytes())?;
            }
            Err(e) => {
                log::warn!("metadata unavailable: {}", e);
                req.into_response(503, Some("Busy"), &[])?;
            }
        }
        Ok(())
    })?;

    server.fn_handler("/restart", Method::Post, |req| -> Result<(), EspIOError> {
        log::info!("restart requested");
        req.into_ok_response()?;
        esp_idf_svc::hal::reset::restart();
    })?;

    server.ws_handler("/ws", move |ws| -> Result<(), EspError> {
        if ws.is_new() {
            log::info!("ws session {} opened", ws.session());
            return Ok(());
        }
        if ws.is_closed() {
            log::info!("ws session {} closed", ws.session());
            return Ok(());
        }

        let mut buf = [0u8; MAX_WS_MESSAGE];
        let (frame_type, _len) = ws.recv(&mut buf)?;
        if let FrameType::Text(_) = frame_type {
            let sink = WsSink(ws.create_detached_sender()?);
            if let Err(e) = radar.bind_client(sink, &CLOCK) {
                log::warn!("ws session {} not bound: {}", ws.session(), e);
            }
        }
        Ok(())
    })?;

    log::info!("http server up");
    Ok(server)
}
