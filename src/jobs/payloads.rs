//! Ready-made payloads for the common job types

use crate::jobs::Tier;
use crate::traits::job::JobPayload;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Transactional email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl JobPayload for SendEmail {
    const JOB_TYPE: &'static str = "email.send";
}

/// WhatsApp message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendWhatsApp {
    pub phone: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl JobPayload for SendWhatsApp {
    const JOB_TYPE: &'static str = "whatsapp.send";
}

/// Audio transcription of a stored recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeAudio {
    pub audio_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl JobPayload for TranscribeAudio {
    const JOB_TYPE: &'static str = "audio.transcribe";
}

/// Invoice generation; deduplicated per invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateInvoice {
    pub invoice_id: String,
    pub customer_id: String,
    /// Also render a PDF copy
    #[serde(default)]
    pub render_pdf: bool,
}

impl JobPayload for GenerateInvoice {
    const JOB_TYPE: &'static str = "invoice.generate";

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("invoice:{}", self.invoice_id))
    }
}

/// Tax document submission; deduplicated per document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitTaxDocument {
    pub document_id: String,
    pub document_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<NaiveDate>,
    /// Submit through the fast lane (e.g., filing deadline)
    #[serde(default)]
    pub urgent: bool,
}

impl JobPayload for SubmitTaxDocument {
    const JOB_TYPE: &'static str = "tax.submit";

    fn tier(&self) -> Option<Tier> {
        self.urgent.then_some(Tier::Critical)
    }

    fn idempotency_key(&self) -> Option<String> {
        Some(format!("tax:{}", self.document_id))
    }
}
