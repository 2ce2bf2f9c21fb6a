//! HTTPS transport over the ESP-IDF HTTP client
//!
//! One connection per request, verified against the bundled CA certificates,
//! with the fixed connect/response timeout. A slow server can stall a single
//! control-loop tick for at most that long; the render task is unaffected.

use embedded_svc::http::client::Client;
use embedded_svc::http::{Method as SvcMethod, Status};
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use esp_idf_svc::io::{Read, Write};
use log::debug;

use crate::config::HTTP_TIMEOUT;
use crate::graph::{HttpRequest, HttpResponse, HttpTransport, Method, MAX_RESPONSE_BYTES};

#[derive(Debug, Default, Clone, Copy)]
pub struct EspHttpTransport;

impl HttpTransport for EspHttpTransport {
    fn execute(&mut self, request: &HttpRequest) -> anyhow::Result<HttpResponse> {
        let connection = EspHttpConnection::new(&Configuration {
            timeout: Some(HTTP_TIMEOUT),
            crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
            ..Default::default()
        })?;
        let mut client = Client::wrap(connection);

        let body = request.form.as_deref().unwrap_or_default();
        let content_length = body.len().to_string();
        let authorization = request.bearer.as_ref().map(|token| format!("Bearer {}", token));

        let mut headers = vec![("accept", "application/json")];
        if request.form.is_some() {
            headers.push(("content-type", "application/x-www-form-urlencoded"));
            headers.push(("content-length", content_length.as_str()));
        }
        if let Some(authorization) = authorization.as_deref() {
            headers.push(("authorization", authorization));
        }

        let method = match request.method {
            Method::Get => SvcMethod::Get,
            Method::Post => SvcMethod::Post,
        };
        let mut outgoing = client.request(method, &request.url, &headers)?;
        if !body.is_empty() {
            outgoing.write_all(body.as_bytes())?;
            outgoing.flush()?;
        }
        let mut response = outgoing.submit()?;
        let status = response.status();

        // Read one byte past the limit so the client can tell the body was too large
        let mut payload = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let read = response.read(&mut buf)?;
            if read == 0 {
                break;
            }
            payload.extend_from_slice(&buf[..read]);
            if payload.len() > MAX_RESPONSE_BYTES {
                break;
            }
        }

        debug!("{:?} -> HTTP {} ({} bytes)", request, status, payload.len());
        Ok(HttpResponse {
            status,
            body: payload,
        })
    }
}
