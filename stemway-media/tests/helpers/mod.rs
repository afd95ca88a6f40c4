//! Shared helpers for API integration tests
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request};
use axum::Router;
use sha2::{Digest, Sha256};
use stemway_media::{build_router, AppState, ServiceConfig};
use tempfile::TempDir;

pub const BOUNDARY: &str = "stemway-test-boundary";

/// Create a test app backed by a temp storage root with small limits
pub async fn create_test_app() -> (Router, AppState, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    let config = ServiceConfig {
        root_folder: dir.path().to_path_buf(),
        port: 0,
        max_upload_bytes: 10 * 1024 * 1024,
        default_chunk_bytes: 1024,
        session_ttl_secs: 3600,
        sweep_interval_secs: 300,
    };

    let state = AppState::new(config).await.expect("Failed to build state");
    let app = build_router(state.clone());
    (app, state, dir)
}

/// Lowercase hex SHA-256, matching what the chunk endpoint expects
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Build a multipart body for one chunk upload
pub fn chunk_body(index: u32, hash: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    push_text_part(&mut body, "chunk_index", &index.to_string());
    push_text_part(&mut body, "chunk_hash", hash);
    push_file_part(&mut body, "chunk", "chunk.bin", bytes);
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Build a multipart body with one file part per stem
pub fn stems_body(stems: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    for (i, stem) in stems.iter().enumerate() {
        push_file_part(&mut body, "files", &format!("stem_{}.wav", i), stem);
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn push_text_part(body: &mut Vec<u8>, name: &str, value: &str) {
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            BOUNDARY, name, value
        )
        .as_bytes(),
    );
}

fn push_file_part(body: &mut Vec<u8>, name: &str, filename: &str, bytes: &[u8]) {
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, name, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(b"\r\n");
}

/// Multipart POST request with the shared test boundary
pub fn multipart_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

/// JSON request helper
pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Empty-body request helper
pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// In-memory 16-bit mono WAV sine, 0.1s at the given rate
pub fn test_wav_bytes(sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = sample_rate / 10;
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let v = (t * 440.0 * 2.0 * std::f32::consts::PI).sin();
            writer.write_sample((v * 16_000.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
