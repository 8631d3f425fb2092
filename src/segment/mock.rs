use super::SegmentationService;
use crate::params::SegmentationParams;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Scripted outcome for one mock segmentation call.
#[derive(Debug, Clone)]
enum MockOutcome {
    Image(Vec<u8>),
    Failure(String),
}

#[derive(Clone)]
pub struct MockSegmentationClient {
    responses: Arc<Mutex<Vec<MockOutcome>>>,
    calls: Arc<Mutex<Vec<SegmentationParams>>>,
}

impl MockSegmentationClient {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_image_response(self, image: Vec<u8>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(MockOutcome::Image(image));
        self
    }

    pub fn with_failure(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(MockOutcome::Failure(message.to_string()));
        self
    }

    pub fn get_call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Parameters passed to each call, oldest first.
    pub fn get_calls(&self) -> Vec<SegmentationParams> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockSegmentationClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SegmentationService for MockSegmentationClient {
    async fn segment(&self, _image: &[u8], params: &SegmentationParams) -> Result<Vec<u8>> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(*params);

        let responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            // Return a tiny valid PNG as default
            return Ok(vec![
                0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // PNG signature
                0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR chunk
                0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1x1 pixel
                0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, 0xDE, 0x00, 0x00, 0x00, 0x0C, 0x49,
                0x44, 0x41, // IDAT chunk
                0x54, 0x08, 0x99, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0xE2,
                0x25, 0x00, 0xBC, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, // IEND chunk
                0x44, 0xAE, 0x42, 0x60, 0x82,
            ]);
        }

        let index = (calls.len() - 1) % responses.len();
        match &responses[index] {
            MockOutcome::Image(image) => Ok(image.clone()),
            MockOutcome::Failure(message) => Err(Error::Segmentation(message.clone())),
        }
    }
}
