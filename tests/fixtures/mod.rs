//! Job request fixtures shared by the pipeline and API tests
#![allow(dead_code)]

use mirror_pipeline::models::{Capabilities, NewJobRequest};

/// Backend names registered by the test harness
pub const DOWNLOADER: &str = "fake-dl";
pub const UPLOADER: &str = "fake-up";

/// A job description that exercises one path through the pipeline
#[derive(Debug, Clone)]
pub struct JobFixture {
    pub source: &'static str,
    pub compress: bool,
    pub decompress: bool,
    pub description: &'static str,
}

pub const PLAIN: JobFixture = JobFixture {
    source: "https://mirror.example.com/plain.iso",
    compress: false,
    decompress: false,
    description: "download then upload",
};

pub const COMPRESS_ONLY: JobFixture = JobFixture {
    source: "https://mirror.example.com/folder/",
    compress: true,
    decompress: false,
    description: "download, compress, upload",
};

pub const DECOMPRESS_ONLY: JobFixture = JobFixture {
    source: "https://mirror.example.com/archive.tar",
    compress: false,
    decompress: true,
    description: "download, decompress, upload",
};

pub const FULL: JobFixture = JobFixture {
    source: "magnet:?xt=urn:btih:0123456789abcdef",
    compress: true,
    decompress: true,
    description: "every stage",
};

impl JobFixture {
    pub fn request(&self) -> NewJobRequest {
        NewJobRequest {
            source: self.source.to_string(),
            destination: Some("mirrors".to_string()),
            capabilities: Capabilities {
                downloader: DOWNLOADER.to_string(),
                uploader: UPLOADER.to_string(),
                compress: self.compress,
                decompress: self.decompress,
            },
            requester: Some(serde_json::json!({ "chat_id": 1001, "message_id": 7 })),
        }
    }

    /// Same request as JSON, as the command front end would post it
    pub fn json(&self) -> serde_json::Value {
        serde_json::json!({
            "source": self.source,
            "destination": "mirrors",
            "capabilities": {
                "downloader": DOWNLOADER,
                "uploader": UPLOADER,
                "compress": self.compress,
                "decompress": self.decompress,
            },
            "requester": { "chat_id": 1001, "message_id": 7 },
        })
    }
}
