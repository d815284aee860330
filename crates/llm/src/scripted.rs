//! A scripted provider: each call replays the next pre-recorded chunk
//! sequence. Backs the end-to-end scenario tests and local dry-runs.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use relay_domain::stream::{BoxStream, LlmChunk};
use relay_domain::{Error, Result};

use crate::traits::{LlmProvider, LlmRequest};

pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<LlmChunk>>>,
    requests: Mutex<Vec<LlmRequest>>,
    /// Optional pause between chunks, to open cancellation windows.
    chunk_delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<LlmChunk>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            chunk_delay: None,
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Requests received so far (assertion surface).
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining_scripts(&self) -> usize {
        self.scripts.lock().len()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(&self, req: &LlmRequest) -> Result<BoxStream<'static, Result<LlmChunk>>> {
        self.requests.lock().push(req.clone());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Provider {
                provider: "scripted".into(),
                message: "no scripts remaining".into(),
            })?;
        let delay = self.chunk_delay;

        Ok(Box::pin(async_stream::stream! {
            for chunk in script {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
        }))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}
