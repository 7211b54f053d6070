//! Component K: outbound email. Plaintext bodies only — a full HTML
//! template is out of scope, so `SmtpEmailSender` builds the minimal body
//! each notification needs and hands it to `lettre`.

use crate::config::Config;
use crate::domain::{Address, Client, Job};
use crate::error::PipelineError;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_assignment_notification(
        &self,
        client: &Client,
        addresses: &[Address],
    ) -> Result<(), PipelineError>;

    async fn send_notification_eve(&self, client: &Client) -> Result<(), PipelineError>;

    async fn send_cto_alert(&self, job: &Job, error: &str) -> Result<(), PipelineError>;
}

pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: String,
    cto_email: String,
}

impl SmtpEmailSender {
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_server)
            .map_err(|e| PipelineError::Transient(e.to_string()))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            sender: config.email_sender.clone(),
            cto_email: config.cto_email.clone(),
        })
    }

    async fn send(&self, to: &str, subject: &str, body: String) -> Result<(), PipelineError> {
        let message = Message::builder()
            .from(self.sender.parse().map_err(|e: lettre::address::AddressError| {
                PipelineError::DataInvalid(e.to_string())
            })?)
            .to(to.parse().map_err(|e: lettre::address::AddressError| {
                PipelineError::DataInvalid(e.to_string())
            })?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| PipelineError::DataInvalid(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_assignment_notification(
        &self,
        client: &Client,
        addresses: &[Address],
    ) -> Result<(), PipelineError> {
        let mut body = format!(
            "Bonjour {},\n\nVoici {} nouveau(x) bien(s) correspondant a vos criteres :\n\n",
            client.first_name,
            addresses.len()
        );
        for address in addresses {
            body.push_str(&format!(
                "- {} (vendu le {}, prix {} EUR)\n",
                address.raw_address, address.sale_date, address.price
            ));
        }
        self.send(&client.email, "Nouveaux biens disponibles", body).await
    }

    async fn send_notification_eve(&self, client: &Client) -> Result<(), PipelineError> {
        let body = format!(
            "Bonjour {},\n\nVotre prochain rapport de biens sera envoye demain.\n",
            client.first_name
        );
        self.send(&client.email, "Rapport a venir demain", body).await
    }

    async fn send_cto_alert(&self, job: &Job, error: &str) -> Result<(), PipelineError> {
        let body = format!(
            "Job {} for client {} failed permanently after {} attempt(s).\n\nError: {}\n",
            job.id, job.client_id, job.attempt_count, error
        );
        self.send(&self.cto_email, "Job failed permanently", body).await
    }
}

/// Test double recording every call instead of sending anything, so
/// orchestrator tests can assert on what would have been sent.
#[derive(Default)]
pub struct RecordingEmailSender {
    pub assignment_notifications: Mutex<Vec<(Uuid, usize)>>,
    pub notification_eves: Mutex<Vec<Uuid>>,
    pub cto_alerts: Mutex<Vec<(Uuid, String)>>,
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_assignment_notification(
        &self,
        client: &Client,
        addresses: &[Address],
    ) -> Result<(), PipelineError> {
        self.assignment_notifications
            .lock()
            .unwrap()
            .push((client.id, addresses.len()));
        Ok(())
    }

    async fn send_notification_eve(&self, client: &Client) -> Result<(), PipelineError> {
        self.notification_eves.lock().unwrap().push(client.id);
        Ok(())
    }

    async fn send_cto_alert(&self, job: &Job, error: &str) -> Result<(), PipelineError> {
        self.cto_alerts
            .lock()
            .unwrap()
            .push((job.id, error.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Client, ClientStatus, JobStatus, PropertyType};
    use chrono::Utc;

    fn client() -> Client {
        Client {
            id: Uuid::new_v4(),
            first_name: "Marie".into(),
            last_name: "Dupont".into(),
            email: "marie@example.com".into(),
            status: ClientStatus::Active,
            chosen_cities: vec![],
            property_type_preferences: vec![PropertyType::House],
            addresses_per_report: 5,
            send_day: 1,
        }
    }

    fn job(id: Uuid) -> Job {
        Job {
            id,
            client_id: Uuid::new_v4(),
            status: JobStatus::FailedPermanent,
            attempt_count: 3,
            last_attempt: Some(Utc::now()),
            next_attempt: None,
            error_message: Some("boom".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn recording_sender_captures_assignment_notifications() {
        let sender = RecordingEmailSender::default();
        let c = client();
        sender.send_assignment_notification(&c, &[]).await.unwrap();
        let recorded = sender.assignment_notifications.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, c.id);
    }

    #[tokio::test]
    async fn recording_sender_captures_cto_alerts() {
        let sender = RecordingEmailSender::default();
        let j = job(Uuid::new_v4());
        sender.send_cto_alert(&j, "disk full").await.unwrap();
        let recorded = sender.cto_alerts.lock().unwrap();
        assert_eq!(recorded[0].1, "disk full");
    }
}
