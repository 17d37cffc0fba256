//! One handler per job kind.

use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;
use turbomarket_analytics::{EventSink, names};
use turbomarket_common::{
    CampaignRequest, DeliveryOutcome, DeliverySummary, EmailContent, Envelope, Event, internal,
    tracing,
};
use turbomarket_content::{ContentComposer, render_html};
use turbomarket_gateway::{DeliveryGateway, TemplateSend, align_outcomes, destination_for};
use turbomarket_queue::{
    BulkSendRequest, ClaimToken, Job, JobId, JobOptions, JobPayload, JobQueue, JobQueues,
    Progress, TemplateSendRequest,
};

use crate::{JobError, RateLimiter};

/// The services a handler calls out to
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub composer: ContentComposer,
    pub gateway: Arc<dyn DeliveryGateway>,
    pub events: EventSink,
}

/// Result of a `generate-content` job: the content itself, plus the id of
/// the send job it was handed to, if any
#[derive(Debug, Serialize)]
struct GenerationResult {
    #[serde(flatten)]
    content: EmailContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    delivery_job_id: Option<JobId>,
}

/// The claim a handler is running under
pub(crate) struct JobContext<'a> {
    pub(crate) queue: &'a JobQueue,
    pub(crate) job: &'a Job,
    pub(crate) token: ClaimToken,
}

impl JobContext<'_> {
    fn event(&self, name: &str) -> Event {
        Event::new(name, self.job.payload.user_id().unwrap_or_default())
            .with_session(self.job.id.to_string())
    }

    /// Best effort; a lost claim surfaces when the job is settled
    async fn progress(&self, progress: Progress) {
        if let Err(err) = self
            .queue
            .update_progress(&self.job.id, self.token, progress)
            .await
        {
            tracing::debug!(job_id = %self.job.id, "Progress update dropped: {err}");
        }
    }
}

#[derive(Debug)]
pub(crate) struct Handlers {
    collaborators: Collaborators,
    limiter: Arc<RateLimiter>,
    queues: JobQueues,
    delivery_queue: String,
}

impl Handlers {
    pub(crate) const fn new(
        collaborators: Collaborators,
        limiter: Arc<RateLimiter>,
        queues: JobQueues,
        delivery_queue: String,
    ) -> Self {
        Self {
            collaborators,
            limiter,
            queues,
            delivery_queue,
        }
    }

    /// Run the job's work, returning the value to store as its result
    pub(crate) async fn handle(&self, ctx: &JobContext<'_>) -> Result<serde_json::Value, JobError> {
        match &ctx.job.payload {
            JobPayload::GenerateContent(request) => self.generate_content(ctx, request).await,
            JobPayload::SendSingle(envelope) => self.send_single(ctx, envelope).await,
            JobPayload::SendBulk(request) => self.send_bulk(ctx, request).await,
            JobPayload::SendTemplate(request) => self.send_template(ctx, request).await,
        }
    }

    async fn generate_content(
        &self,
        ctx: &JobContext<'_>,
        request: &CampaignRequest,
    ) -> Result<serde_json::Value, JobError> {
        self.collaborators.events.record(
            ctx.event(names::GENERATION_STARTED)
                .property("emailType", request.email_type.as_str())
                .property("audienceType", request.audience_type.as_str())
                .property("goal", request.goal.as_str()),
        );

        let content = self.collaborators.composer.compose(request).await?;

        self.collaborators.events.record(
            ctx.event(names::GENERATION_COMPLETED)
                .property("emailType", request.email_type.as_str())
                .property("hasImage", content.hero_image_url.is_some())
                .property("contentLength", content.body_html.len()),
        );

        let delivery_job_id = match &request.delivery {
            Some(plan) => {
                let payload = JobPayload::SendBulk(BulkSendRequest {
                    content: content.clone(),
                    from: plan.from.clone(),
                    recipients: plan.recipients.clone(),
                    configuration_set: plan.configuration_set.clone(),
                    idempotency_key: Some(ctx.job.id.to_string()),
                });

                let options = plan
                    .priority
                    .map_or_else(JobOptions::new, |priority| JobOptions::new().priority(priority));

                let job = self
                    .queues
                    .queue(&self.delivery_queue)
                    .map_err(JobError::Chain)?
                    .enqueue(payload, options)
                    .await
                    .map_err(JobError::Chain)?;

                internal!(
                    level = INFO,
                    "Generated content for job {} handed to delivery job {}",
                    ctx.job.id,
                    job.id
                );
                Some(job.id)
            }
            None => None,
        };

        Ok(serde_json::to_value(GenerationResult {
            content,
            delivery_job_id,
        })?)
    }

    /// Send one envelope.
    ///
    /// A provider refusing the message is the job's result, not its failure;
    /// only a retryable transport error fails the attempt.
    async fn send_single(
        &self,
        ctx: &JobContext<'_>,
        envelope: &Envelope,
    ) -> Result<serde_json::Value, JobError> {
        self.limiter.acquire(envelope.all_recipients().count()).await;

        let recipient_email = envelope
            .to
            .first()
            .map(|address| address.email.as_str())
            .unwrap_or_default();

        let outcome = match self.collaborators.gateway.send_single(envelope).await {
            Ok(receipt) => DeliveryOutcome::success(None, receipt.message_id),
            Err(err) if err.is_retryable() => {
                let outcome = DeliveryOutcome::failure(None, err.to_string());
                self.collaborators
                    .events
                    .record(sent_event(ctx, recipient_email, "single", &outcome));
                return Err(err.into());
            }
            Err(err) => DeliveryOutcome::failure(None, err.to_string()),
        };

        self.collaborators
            .events
            .record(sent_event(ctx, recipient_email, "single", &outcome));

        Ok(serde_json::to_value(outcome)?)
    }

    /// Send generated content to each recipient in turn.
    ///
    /// A provider refusing one recipient is recorded and the batch goes on;
    /// a transport failure stops the batch and fails the attempt.
    async fn send_bulk(
        &self,
        ctx: &JobContext<'_>,
        request: &BulkSendRequest,
    ) -> Result<serde_json::Value, JobError> {
        let content = &request.content;
        let html = render_html(content);
        let total = request.recipients.len() as u64;
        let mut outcomes = Vec::with_capacity(request.recipients.len());

        for (index, recipient) in request.recipients.iter().enumerate() {
            let mut envelope = Envelope::new(
                request.from.clone(),
                vec![recipient.address()],
                content.subject.as_str(),
            )
            .with_html(html.as_str())
            .with_tag("campaign_type", content.metadata.email_type.as_str())
            .with_tag("user_id", content.metadata.user_id.as_str())
            .with_tag("recipient_id", recipient.id.as_str());
            envelope.configuration_set.clone_from(&request.configuration_set);
            envelope.idempotency_key.clone_from(&request.idempotency_key);

            self.limiter.acquire(1).await;

            let outcome = match self.collaborators.gateway.send_single(&envelope).await {
                Ok(receipt) => DeliveryOutcome::success(Some(recipient.id.clone()), receipt.message_id),
                Err(err) if err.is_retryable() => return Err(err.into()),
                Err(err) => DeliveryOutcome::failure(Some(recipient.id.clone()), err.to_string()),
            };

            self.collaborators.events.record(sent_event(
                ctx,
                &recipient.email,
                content.metadata.email_type.as_str(),
                &outcome,
            ));

            outcomes.push(outcome);
            ctx.progress(Progress::Steps {
                completed: index as u64 + 1,
                total,
            })
            .await;
        }

        Ok(serde_json::to_value(DeliverySummary::from_outcomes(outcomes))?)
    }

    async fn send_template(
        &self,
        ctx: &JobContext<'_>,
        request: &TemplateSendRequest,
    ) -> Result<serde_json::Value, JobError> {
        let destinations: Vec<_> = request
            .recipients
            .iter()
            .map(|recipient| destination_for(recipient, &request.template_data))
            .collect();

        let template = TemplateSend {
            from: request.from.clone(),
            template_name: request.template_name.clone(),
            default_data: request.template_data.clone(),
            configuration_set: request.configuration_set.clone(),
            tags: BTreeMap::from([("template".to_string(), request.template_name.clone())]),
        };

        self.limiter.acquire(destinations.len()).await;

        let outcomes = self
            .collaborators
            .gateway
            .send_bulk(&template, &destinations)
            .await?;

        let outcomes: Vec<_> = align_outcomes(outcomes, destinations.len())
            .into_iter()
            .zip(&request.recipients)
            .map(|(outcome, recipient)| outcome.for_recipient(recipient.id.as_str()))
            .collect();

        let summary = DeliverySummary::from_outcomes(outcomes);

        self.collaborators.events.record(
            ctx.event(names::BULK_EMAIL_SENT)
                .property("template_name", request.template_name.as_str())
                .property("recipient_count", summary.total())
                .property("success_count", summary.sent)
                .property("failed_count", summary.failed),
        );

        Ok(serde_json::to_value(summary)?)
    }
}

/// `email_sent` for one recipient
fn sent_event(
    ctx: &JobContext<'_>,
    recipient_email: &str,
    email_type: &str,
    outcome: &DeliveryOutcome,
) -> Event {
    let mut event = ctx
        .event(names::EMAIL_SENT)
        .property("recipient_email", recipient_email)
        .property("email_type", email_type)
        .property("status", if outcome.is_success() { "success" } else { "failed" });
    if let Some(message_id) = &outcome.message_id {
        event = event.property("message_id", message_id.as_str());
    }
    if let Some(error) = &outcome.error {
        event = event.property("error", error.as_str());
    }
    event
}
