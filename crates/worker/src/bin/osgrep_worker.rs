//! Subordinate inference process. Reads one JSON request per line on stdin, writes one
//! JSON response per line on stdout. The model is a process-local singleton, loaded
//! lazily on the first request handled (§9: per-worker model state, not reentrant).

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use osgrep_worker::model::ModelBundle;
use osgrep_worker::protocol::{
    EmbedBatchPayload, EmbedBatchResult, EncodeQueryPayload, EncodeQueryResult, Method,
    RerankPayload, RerankResult, Request, Response,
};

fn model_dir() -> PathBuf {
    std::env::var("OSGREP_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./models"))
}

fn handle(model: &mut Option<ModelBundle>, req: Request) -> Response {
    if model.is_none() {
        match ModelBundle::load(&model_dir()) {
            Ok(m) => *model = Some(m),
            Err(e) => return Response::err(req.id, format!("model load failed: {e}")),
        }
    }
    let model = model.as_ref().expect("just initialized");

    let result = match req.method {
        Method::ProcessFile => serde_json::from_value::<EmbedBatchPayload>(req.payload)
            .map_err(|e| e.to_string())
            .and_then(|p| model.embed_batch(&p.texts).map_err(|e| e.to_string()))
            .map(|vectors| serde_json::to_value(EmbedBatchResult { vectors }).unwrap()),
        Method::EncodeQuery => serde_json::from_value::<EncodeQueryPayload>(req.payload)
            .map_err(|e| e.to_string())
            .and_then(|p| model.encode_query(&p.text).map_err(|e| e.to_string()))
            .map(|vector| serde_json::to_value(EncodeQueryResult { vector }).unwrap()),
        Method::Rerank => serde_json::from_value::<RerankPayload>(req.payload)
            .map_err(|e| e.to_string())
            .and_then(|p| model.rerank(&p.query, &p.docs).map_err(|e| e.to_string()))
            .map(|scores| serde_json::to_value(RerankResult { scores }).unwrap()),
    };

    match result {
        Ok(value) => Response::ok(req.id, value),
        Err(e) => Response::err(req.id, e),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut model: Option<ModelBundle> = None;

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let req: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "failed to parse request");
                continue;
            }
        };
        let resp = handle(&mut model, req);
        let serialized = serde_json::to_string(&resp).expect("response always serializes");
        if writeln!(out, "{serialized}").is_err() {
            break;
        }
        out.flush().ok();
    }
}
