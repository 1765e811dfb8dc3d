use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::{daemon::storage::entities::DestinationConfig, report::Report};

use super::EmailSender;

const EMAILJS_SEND_URL: &str = "https://api.emailjs.com/api/v1.0/email/send";

/// Must stay below the stuck timeout of a delivery, so that an outstanding request never looks
/// abandoned.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct TemplateParams<'a> {
    to_email: String,
    subject: &'a str,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    service_id: &'a str,
    template_id: &'a str,
    user_id: &'a str,
    template_params: TemplateParams<'a>,
}

/// Delivers reports through the EmailJS REST api.
pub struct EmailJsSender {
    client: reqwest::Client,
    url: String,
}

impl EmailJsSender {
    pub fn new() -> Result<Self> {
        Self::with_url(EMAILJS_SEND_URL.into())
    }

    pub fn with_url(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, url })
    }
}

fn build_request<'a>(
    destination: &'a DestinationConfig,
    report: &'a Report,
) -> Result<EmailRequest<'a>> {
    let missing = || anyhow!("Destination is missing {:?}", destination.missing_fields());
    Ok(EmailRequest {
        service_id: destination.service_id.as_deref().ok_or_else(missing)?,
        template_id: destination.template_id.as_deref().ok_or_else(missing)?,
        user_id: destination.public_key.as_deref().ok_or_else(missing)?,
        template_params: TemplateParams {
            to_email: destination.to_field(),
            subject: &report.subject,
            message: &report.body,
        },
    })
}

#[async_trait]
impl EmailSender for EmailJsSender {
    async fn send(&self, destination: &DestinationConfig, report: &Report) -> Result<()> {
        let request = build_request(destination, report)?;
        debug!("Sending '{}' to {}", report.subject, request.template_params.to_email);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .context("Email request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Email service responded with {status}: {text}"));
        }

        info!("Email '{}' accepted", report.subject);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() -> Result<()> {
        let destination = DestinationConfig {
            recipients: vec!["a@example.com".into(), "".into(), "b@example.com".into()],
            service_id: Some("service".into()),
            template_id: Some("template".into()),
            public_key: Some("key".into()),
            report_owner: None,
        };
        let report = Report {
            subject: "subject".into(),
            body: "body".into(),
        };

        let json = serde_json::to_value(build_request(&destination, &report)?)?;
        assert_eq!(
            json,
            serde_json::json!({
                "service_id": "service",
                "template_id": "template",
                "user_id": "key",
                "template_params": {
                    "to_email": "a@example.com, b@example.com",
                    "subject": "subject",
                    "message": "body",
                }
            })
        );
        Ok(())
    }

    #[test]
    fn test_request_requires_credentials() {
        let report = Report {
            subject: "subject".into(),
            body: "body".into(),
        };
        assert!(build_request(&DestinationConfig::default(), &report).is_err());
    }
}
