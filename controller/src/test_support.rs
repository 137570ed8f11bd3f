//! Scripted collaborators and an in-memory blob store for tests.
//!
//! Each scripted collaborator pops one scripted response per call and records
//! what it was asked, so tests can assert on both the outcome and the calls.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::{ActionRequest, Verdict};
use crate::io::action::ActionExecutor;
use crate::io::blob_store::{BlobStore, content_digest, validate_document_key};
use crate::io::capture::{GrabRequest, ScreenSource};
use crate::io::focus::{FocusGate, FocusRequest};
use crate::io::predicate::{EvaluationRequest, MatchPredicate};

fn pop<T>(script: &Mutex<VecDeque<T>>) -> Option<T> {
    script.lock().expect("script lock").pop_front()
}

/// Focus gate answering from a script. An exhausted script errors.
pub struct ScriptedFocusGate {
    script: Mutex<VecDeque<Result<bool, String>>>,
    targets: Mutex<Vec<String>>,
}

impl ScriptedFocusGate {
    pub fn new(script: Vec<bool>) -> Self {
        Self::from_results(script.into_iter().map(Ok).collect())
    }

    pub fn from_results(script: Vec<Result<bool, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.targets.lock().expect("targets lock").len()
    }

    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().expect("targets lock").clone()
    }
}

impl FocusGate for ScriptedFocusGate {
    fn ensure_focus(&self, request: &FocusRequest) -> Result<bool> {
        self.targets
            .lock()
            .expect("targets lock")
            .push(request.target.clone());
        match pop(&self.script) {
            Some(result) => result.map_err(|err| anyhow!(err)),
            None => Err(anyhow!("focus script exhausted")),
        }
    }
}

/// Screen source answering from a script.
///
/// A sequential screen falls back to a distinct frame per grab once its
/// script is used up; a plain scripted screen errors instead.
pub struct ScriptedScreen {
    script: Mutex<VecDeque<Result<Vec<u8>, String>>>,
    sequential: bool,
    labels: Mutex<Vec<String>>,
}

impl ScriptedScreen {
    pub fn new(script: Vec<Result<Vec<u8>, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            sequential: false,
            labels: Mutex::new(Vec::new()),
        }
    }

    pub fn sequential() -> Self {
        Self {
            sequential: true,
            ..Self::new(Vec::new())
        }
    }

    /// Labels of every grab, in call order.
    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().expect("labels lock").clone()
    }
}

impl ScreenSource for ScriptedScreen {
    fn grab(&self, request: &GrabRequest) -> Result<Vec<u8>> {
        let frame = {
            let mut labels = self.labels.lock().expect("labels lock");
            labels.push(request.label.clone());
            labels.len()
        };
        match pop(&self.script) {
            Some(result) => result.map_err(|err| anyhow!(err)),
            None if self.sequential => Ok(format!("frame-{frame}").into_bytes()),
            None => Err(anyhow!("screen script exhausted")),
        }
    }
}

/// Action executor answering from a script. An exhausted script succeeds.
#[derive(Default)]
pub struct ScriptedActionExecutor {
    script: Mutex<VecDeque<Result<(), String>>>,
    requests: Mutex<Vec<ActionRequest>>,
}

impl ScriptedActionExecutor {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn new(script: Vec<Result<(), String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request that reached the executor.
    pub fn performed(&self) -> Vec<ActionRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl ActionExecutor for ScriptedActionExecutor {
    fn execute(&self, request: &ActionRequest, _timeout: Duration) -> Result<()> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        pop(&self.script)
            .unwrap_or(Ok(()))
            .map_err(|err| anyhow!(err))
    }
}

/// Match predicate answering from a script. An exhausted script errors.
pub struct ScriptedPredicate {
    script: Mutex<VecDeque<Result<Verdict, String>>>,
    seen: Mutex<Vec<SeenEvaluation>>,
}

/// What the predicate was asked to judge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenEvaluation {
    pub baseline_label: String,
    pub post_label: String,
    pub expectation: String,
    pub reason: String,
}

impl ScriptedPredicate {
    pub fn new(verdicts: Vec<bool>) -> Self {
        Self::from_results(
            verdicts
                .into_iter()
                .map(|matched| {
                    Ok(if matched {
                        Verdict::matched("scripted match")
                    } else {
                        Verdict::mismatch("scripted mismatch")
                    })
                })
                .collect(),
        )
    }

    pub fn from_results(script: Vec<Result<Verdict, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<SeenEvaluation> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl MatchPredicate for ScriptedPredicate {
    fn evaluate(&self, request: &EvaluationRequest<'_>) -> Result<Verdict> {
        self.seen.lock().expect("seen lock").push(SeenEvaluation {
            baseline_label: request.baseline.artifact.label.clone(),
            post_label: request.post.artifact.label.clone(),
            expectation: request.expectation.to_string(),
            reason: request.reason.to_string(),
        });
        match pop(&self.script) {
            Some(result) => result.map_err(|err| anyhow!(err)),
            None => Err(anyhow!("predicate script exhausted")),
        }
    }
}

/// In-memory [`BlobStore`] that counts writes.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    documents: Mutex<BTreeMap<String, Vec<u8>>>,
    object_writes: Mutex<usize>,
    document_writes: Mutex<usize>,
}

impl MemoryBlobStore {
    pub fn object_writes(&self) -> usize {
        *self.object_writes.lock().expect("counter lock")
    }

    pub fn document_writes(&self) -> usize {
        *self.document_writes.lock().expect("counter lock")
    }

    pub fn document_keys(&self) -> Vec<String> {
        self.documents
            .lock()
            .expect("documents lock")
            .keys()
            .cloned()
            .collect()
    }

    /// Drop a stored object, simulating a lost blob.
    pub fn remove_object(&self, digest: &str) -> bool {
        self.objects
            .lock()
            .expect("objects lock")
            .remove(digest)
            .is_some()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, data: &[u8]) -> Result<String> {
        let digest = content_digest(data);
        let mut objects = self.objects.lock().expect("objects lock");
        if !objects.contains_key(&digest) {
            objects.insert(digest.clone(), data.to_vec());
            *self.object_writes.lock().expect("counter lock") += 1;
        }
        Ok(digest)
    }

    fn get(&self, digest: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .expect("objects lock")
            .get(digest)
            .cloned()
            .ok_or_else(|| anyhow!("blob {digest} not found"))
    }

    fn exists(&self, digest: &str) -> Result<bool> {
        Ok(self.objects.lock().expect("objects lock").contains_key(digest))
    }

    fn put_document(&self, key: &str, data: &[u8]) -> Result<()> {
        validate_document_key(key)?;
        let mut documents = self.documents.lock().expect("documents lock");
        match documents.get(key) {
            Some(existing) if existing.as_slice() == data => Ok(()),
            Some(_) => Err(anyhow!("document {key} already exists with different content")),
            None => {
                documents.insert(key.to_string(), data.to_vec());
                *self.document_writes.lock().expect("counter lock") += 1;
                Ok(())
            }
        }
    }

    fn get_document(&self, key: &str) -> Result<Vec<u8>> {
        self.documents
            .lock()
            .expect("documents lock")
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("document {key} not found"))
    }

    fn document_exists(&self, key: &str) -> Result<bool> {
        Ok(self.documents.lock().expect("documents lock").contains_key(key))
    }
}
