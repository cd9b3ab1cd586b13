use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::{Appointment, AppointmentStatus, Ms};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Booked,
    Rescheduled,
    StatusChanged,
    Reminder,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Booked => "booked",
            NotificationKind::Rescheduled => "rescheduled",
            NotificationKind::StatusChanged => "status_changed",
            NotificationKind::Reminder => "reminder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub appointment_id: Ulid,
    pub branch_id: String,
    pub appointment_date: Ms,
    pub status: AppointmentStatus,
}

impl Notification {
    pub fn for_appointment(kind: NotificationKind, appointment: &Appointment) -> Self {
        Self {
            kind,
            appointment_id: appointment.id,
            branch_id: appointment.branch_id.clone(),
            appointment_date: appointment.appointment_date,
            status: appointment.status,
        }
    }

    /// JSON payload as delivered on a LISTEN channel.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    Client(String),
    Stylist(String),
}

impl Recipient {
    pub fn channel(&self) -> String {
        match self {
            Recipient::Client(id) => format!("client_{id}"),
            Recipient::Stylist(id) => format!("stylist_{id}"),
        }
    }

    pub fn from_channel(channel: &str) -> Option<Self> {
        let (ctor, id): (fn(String) -> Recipient, &str) =
            if let Some(id) = channel.strip_prefix("client_") {
                (Recipient::Client, id)
            } else if let Some(id) = channel.strip_prefix("stylist_") {
                (Recipient::Stylist, id)
            } else {
                return None;
            };
        (!id.is_empty()).then(|| ctor(id.to_string()))
    }
}

/// The client (when known) and every stylist assigned to the appointment.
pub fn recipients(appointment: &Appointment) -> Vec<Recipient> {
    let mut out = Vec::new();
    if let Some(client) = appointment.client_id.as_deref().filter(|c| !c.is_empty()) {
        out.push(Recipient::Client(client.to_string()));
    }
    out.extend(
        appointment
            .assigned_stylists()
            .into_iter()
            .map(|s| Recipient::Stylist(s.to_string())),
    );
    out
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery to {channel} failed: {reason}")]
    Delivery { channel: String, reason: String },
}

/// Where booking notifications go. Delivery is best effort: the engine
/// never waits on it and never rolls back because of it.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, recipient: &Recipient, notification: &Notification) -> Result<(), NotifyError>;
}

/// Spawn delivery of `notification` to every recipient. Failures are
/// logged and counted.
pub fn fan_out(sink: Arc<dyn NotificationSink>, notification: Notification, recipients: Vec<Recipient>) {
    if recipients.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for recipient in &recipients {
            if let Err(e) = sink.deliver(recipient, &notification).await {
                warn!(
                    appointment_id = %notification.appointment_id,
                    kind = notification.kind.as_str(),
                    error = %e,
                    "notification delivery failed"
                );
                metrics::counter!(
                    crate::observability::NOTIFICATIONS_FAILED_TOTAL,
                    "kind" => notification.kind.as_str()
                )
                .increment(1);
            }
        }
    });
}

/// Broadcast hub for LISTEN/NOTIFY per recipient channel.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a recipient's channel. Creates the channel if needed.
    pub fn subscribe(&self, recipient: &Recipient) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(recipient.channel())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, recipient: &Recipient, notification: &Notification) {
        if let Some(sender) = self.channels.get(&recipient.channel()) {
            let _ = sender.send(notification.clone());
        }
    }
}

#[async_trait]
impl NotificationSink for NotifyHub {
    async fn deliver(&self, recipient: &Recipient, notification: &Notification) -> Result<(), NotifyError> {
        debug!(channel = %recipient.channel(), kind = notification.kind.as_str(), "notify");
        self.send(recipient, notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceLine;

    fn appointment() -> Appointment {
        Appointment {
            id: Ulid::new(),
            branch_id: "b1".into(),
            appointment_date: 1_800_000_000_000,
            duration: Some(60),
            status: AppointmentStatus::Pending,
            stylist_id: Some("s1".into()),
            service_id: None,
            services: vec![ServiceLine {
                service_id: "color".into(),
                stylist_id: Some("s2".into()),
                ..ServiceLine::default()
            }],
            client_id: Some("c1".into()),
            client_name: None,
            is_guest: false,
            notes: None,
            created_at: 0,
            updated_at: 0,
            reminder_sent: false,
        }
    }

    #[test]
    fn recipients_cover_client_and_stylists() {
        let r = recipients(&appointment());
        assert_eq!(
            r,
            vec![
                Recipient::Client("c1".into()),
                Recipient::Stylist("s1".into()),
                Recipient::Stylist("s2".into()),
            ]
        );
    }

    #[test]
    fn guest_without_client_id_only_notifies_stylists() {
        let mut a = appointment();
        a.client_id = None;
        a.is_guest = true;
        assert!(recipients(&a).iter().all(|r| matches!(r, Recipient::Stylist(_))));
    }

    #[test]
    fn channel_names_roundtrip() {
        for r in [Recipient::Client("c9".into()), Recipient::Stylist("s_7".into())] {
            assert_eq!(Recipient::from_channel(&r.channel()), Some(r));
        }
        assert_eq!(Recipient::from_channel("resource_1"), None);
        assert_eq!(Recipient::from_channel("client_"), None);
    }

    #[test]
    fn payload_is_json() {
        let n = Notification::for_appointment(NotificationKind::Booked, &appointment());
        let v: serde_json::Value = serde_json::from_str(&n.to_json()).unwrap();
        assert_eq!(v["kind"], "booked");
        assert_eq!(v["status"], "pending");
        assert_eq!(v["branch_id"], "b1");
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let stylist = Recipient::Stylist("s1".into());
        let mut rx = hub.subscribe(&stylist);

        let n = Notification::for_appointment(NotificationKind::Reminder, &appointment());
        hub.deliver(&stylist, &n).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), n);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let n = Notification::for_appointment(NotificationKind::Booked, &appointment());
        hub.send(&Recipient::Client("nobody".into()), &n);
    }

    #[tokio::test]
    async fn fan_out_reaches_every_recipient() {
        let hub = Arc::new(NotifyHub::new());
        let a = appointment();
        let mut client_rx = hub.subscribe(&Recipient::Client("c1".into()));
        let mut s2_rx = hub.subscribe(&Recipient::Stylist("s2".into()));

        let n = Notification::for_appointment(NotificationKind::Rescheduled, &a);
        fan_out(hub.clone(), n.clone(), recipients(&a));

        assert_eq!(client_rx.recv().await.unwrap(), n);
        assert_eq!(s2_rx.recv().await.unwrap(), n);
    }
}
