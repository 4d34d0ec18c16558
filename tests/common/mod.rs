#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use legalrag::{Embed, GenerationError, GenerationRequest, Generator, Result};

pub const DIM: usize = 16;

/// Deterministic bag-of-characters embedding. Counts every text it embeds so tests
/// can tell a rebuild from a restore.
#[derive(Default)]
pub struct HashEmbedder {
    pub embedded: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn embedded(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        v[(c as usize) % DIM] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

impl Embed for HashEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn model_id(&self) -> &str {
        "test/hash-embedder"
    }
}

/// Replays queued outcomes and records every request it receives. Once the queue
/// is empty it echoes a canned answer.
#[derive(Default)]
pub struct ScriptedGenerator {
    outcomes: Mutex<VecDeque<std::result::Result<String, GenerationError>>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_answer(&self, answer: &str) {
        self.outcomes.lock().unwrap().push_back(Ok(answer.to_string()));
    }

    pub fn push_failure(&self) {
        self.outcomes.lock().unwrap().push_back(Err(GenerationError::Api {
            status: 429,
            body: "RESOURCE_EXHAUSTED".to_string(),
        }));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("canned answer".to_string()))
    }
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
