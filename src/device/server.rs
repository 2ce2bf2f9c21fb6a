//! Local HTTP control endpoints
//!
//! - `GET /api/startDevicelogin`: begin a device login, answers with the prompt
//! - `GET /api/settings`: settings and session status
//! - `POST /api/settings`: form-encoded settings update
//! - `GET /api/clearSettings`: wipe stored credentials and settings

use anyhow::anyhow;
use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer, Request};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::{Read, Write};
use log::{info, warn};
use serde::Serialize;
use serde_json::json;

use super::SharedSession;
use crate::error::ControlError;

/// Largest settings form accepted
const MAX_FORM_BYTES: usize = 1024;

pub fn start(session: SharedSession) -> anyhow::Result<EspHttpServer<'static>> {
    let mut server = EspHttpServer::new(&Configuration {
        stack_size: 10 * 1024,
        ..Default::default()
    })?;

    let shared = session.clone();
    server.fn_handler::<anyhow::Error, _>("/api/startDevicelogin", Method::Get, move |req| {
        let result = shared
            .lock()
            .map_err(|_| anyhow!("session lock poisoned"))?
            .start_device_login();
        match result {
            Ok(prompt) => {
                info!("{}", prompt.message);
                respond(req, 200, &prompt)
            }
            Err(ControlError::LoginAlreadyRunning) => {
                respond(req, 409, &json!({ "error": "devicelogin_already_running" }))
            }
            Err(e) => {
                warn!("Device login request refused: {}", e);
                respond(req, 500, &json!({ "error": "devicelogin_unknown_response" }))
            }
        }
    })?;

    let shared = session.clone();
    server.fn_handler::<anyhow::Error, _>("/api/settings", Method::Get, move |req| {
        let status = shared
            .lock()
            .map_err(|_| anyhow!("session lock poisoned"))?
            .status();
        respond(req, 200, &status)
    })?;

    let shared = session.clone();
    server.fn_handler::<anyhow::Error, _>("/api/settings", Method::Post, move |mut req| {
        let body = read_body(&mut req)?;
        let mut session = shared.lock().map_err(|_| anyhow!("session lock poisoned"))?;
        let submitted = session.settings().merge_form(&body);
        let result = match submitted {
            Ok(settings) => session.apply_settings(settings),
            Err(e) => Err(ControlError::from(e)),
        };
        drop(session);

        match result {
            Ok(()) => respond(req, 200, &json!({ "action": "save_settings", "error": false })),
            Err(e) => respond(req, 400, &json!({ "error": e.to_string() })),
        }
    })?;

    server.fn_handler::<anyhow::Error, _>("/api/clearSettings", Method::Get, move |req| {
        let result = session
            .lock()
            .map_err(|_| anyhow!("session lock poisoned"))?
            .clear_all();
        match result {
            Ok(()) => respond(req, 200, &json!({ "action": "clear_settings", "error": false })),
            Err(e) => {
                warn!("Clearing settings failed: {}", e);
                respond(req, 500, &json!({ "action": "clear_settings", "error": true }))
            }
        }
    })?;

    info!("Control server listening");
    Ok(server)
}

fn respond<T: Serialize>(
    req: Request<&mut EspHttpConnection<'_>>,
    status: u16,
    body: &T,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(body)?;
    let mut response = req.into_response(status, None, &[("Content-Type", "application/json")])?;
    response.write_all(&payload)?;
    Ok(())
}

fn read_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> anyhow::Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let read = req.read(&mut buf)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&buf[..read]);
        if body.len() > MAX_FORM_BYTES {
            return Err(anyhow!("settings form too large"));
        }
    }
    Ok(body)
}
