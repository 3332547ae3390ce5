use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::connection_manager::ConnectionRegistry;
use crate::domain::{Dossier, DossierStatus, UserRole};
use crate::metrics::NotificationMetrics;
use crate::router::Router;
use crate::websocket::ServerMessage;

use super::store::PendingStore;
use super::types::{Notification, NotificationKind};

/// Who should hear about an event: a role group or a single identity.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Role(UserRole),
    User(String),
}

/// Recipient lists are small (two or three entries); keep them on the stack.
type Targets = SmallVec<[Target; 4]>;

/// Result of a notification delivery attempt
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    /// Notification ID
    pub notification_id: Uuid,
    /// Number of connections the notification was delivered to
    pub delivered_to: usize,
    /// Number of connections that failed to receive
    pub failed: usize,
    /// Number of offline recipients the notification was parked for
    pub queued: usize,
    /// Whether any delivery was successful
    pub success: bool,
}

/// Statistics for the notification dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub total_sent: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_failed: AtomicU64,
    pub total_queued: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_sent: self.total_sent.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_queued: self.total_queued.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub total_queued: u64,
}

/// Encodes the business routing tables: which groups and identities receive
/// each event, keyed by event type and, for status changes, the new status.
pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
    router: Arc<Router>,
    store: Arc<dyn PendingStore>,
    stats: DispatcherStats,
}

impl NotificationDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        router: Arc<Router>,
        store: Arc<dyn PendingStore>,
    ) -> Self {
        Self {
            registry,
            router,
            store,
            stats: DispatcherStats::default(),
        }
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// A new order was created: machine operator group + admin.
    ///
    /// The creator already sees the dossier on their own dashboard and is
    /// not a recipient.
    #[tracing::instrument(
        name = "dispatcher.nouveau_dossier",
        skip(self, dossier),
        fields(numero_commande = %dossier.numero_commande, machine = %dossier.machine)
    )]
    pub async fn notify_nouveau_dossier(
        &self,
        dossier: &Dossier,
        created_by: &str,
    ) -> DeliveryResult {
        let mut targets = Targets::new();
        push_target(&mut targets, Target::Role(dossier.machine.operator_role()));
        push_target(&mut targets, Target::Role(UserRole::Admin));

        let notification = Notification::new(
            NotificationKind::NouveauDossier,
            "Nouveau dossier",
            format!(
                "Commande {} à imprimer sur {}",
                dossier.numero_commande, dossier.machine
            ),
            json!({ "dossier": dossier, "created_by": created_by }),
        );

        let result = self.dispatch(targets, notification).await;
        self.emit_refresh(dossier, None, &dossier.statut, Some(created_by), None)
            .await;
        result
    }

    /// A dossier changed status: recipients depend on the new status.
    #[tracing::instrument(
        name = "dispatcher.changement_statut",
        skip(self, dossier, comment),
        fields(numero_commande = %dossier.numero_commande, new_status = %new_status)
    )]
    pub async fn notify_changement_statut(
        &self,
        dossier: &Dossier,
        old_status: &str,
        new_status: &str,
        changed_by: &str,
        comment: Option<&str>,
    ) -> DeliveryResult {
        let status = DossierStatus::parse(new_status);
        if status.is_none() {
            tracing::warn!(
                numero_commande = %dossier.numero_commande,
                new_status = %new_status,
                "Unknown status label, routing to admin only"
            );
        }

        let mut targets = Targets::new();
        match status {
            Some(DossierStatus::ARevoir) | Some(DossierStatus::Livre) => {
                self.push_creator(&mut targets, dossier);
            }
            Some(DossierStatus::EnImpression) => {
                push_target(&mut targets, Target::Role(dossier.machine.operator_role()));
            }
            Some(DossierStatus::Imprime)
            | Some(DossierStatus::PretALivrer)
            | Some(DossierStatus::Termine) => {
                push_target(&mut targets, Target::Role(UserRole::Livreur));
            }
            Some(DossierStatus::EnCours) | None => {}
        }
        push_target(&mut targets, Target::Role(UserRole::Admin));

        let urgent = status == Some(DossierStatus::ARevoir);
        let mut notification = Notification::new(
            NotificationKind::ChangementStatut,
            "Changement de statut",
            format!(
                "La commande {} est passée au statut {}",
                dossier.numero_commande, new_status
            ),
            json!({
                "dossier": dossier,
                "old_status": old_status,
                "new_status": new_status,
                "changed_by": changed_by,
                "comment": comment,
            }),
        );
        if urgent {
            notification = notification.urgent();
        }

        let result = self.dispatch(targets, notification).await;
        self.emit_refresh(dossier, Some(old_status), new_status, Some(changed_by), comment)
            .await;
        result
    }

    /// A file was uploaded: routed by the dossier's current status.
    ///
    /// While the dossier is in preparation the operators want the sources;
    /// once printing has started, new files are proofs for the preparer.
    #[tracing::instrument(
        name = "dispatcher.fichier_ajoute",
        skip(self, dossier),
        fields(numero_commande = %dossier.numero_commande)
    )]
    pub async fn notify_fichier_ajoute(
        &self,
        dossier: &Dossier,
        uploaded_by: &str,
        file_name: Option<&str>,
    ) -> DeliveryResult {
        let mut targets = Targets::new();
        match dossier.status() {
            Some(DossierStatus::EnCours) | Some(DossierStatus::ARevoir) => {
                push_target(&mut targets, Target::Role(dossier.machine.operator_role()));
            }
            Some(DossierStatus::EnImpression) => {
                push_target(&mut targets, Target::Role(UserRole::Preparateur));
            }
            _ => {}
        }
        push_target(&mut targets, Target::Role(UserRole::Admin));

        let message = match file_name {
            Some(name) => format!(
                "Fichier {} ajouté à la commande {}",
                name, dossier.numero_commande
            ),
            None => format!("Fichier ajouté à la commande {}", dossier.numero_commande),
        };

        let notification = Notification::new(
            NotificationKind::FichierAjoute,
            "Fichier ajouté",
            message,
            json!({
                "dossier": dossier,
                "uploaded_by": uploaded_by,
                "file_name": file_name,
            }),
        );

        let result = self.dispatch(targets, notification).await;
        self.emit_refresh(dossier, None, &dossier.statut, Some(uploaded_by), None)
            .await;
        result
    }

    /// A dossier was flagged urgent: one broadcast to every connection.
    #[tracing::instrument(
        name = "dispatcher.dossier_urgent",
        skip(self, dossier),
        fields(numero_commande = %dossier.numero_commande)
    )]
    pub async fn notify_dossier_urgent(&self, dossier: &Dossier) -> DeliveryResult {
        let notification = Notification::new(
            NotificationKind::DossierUrgent,
            "Dossier urgent",
            format!("La commande {} est urgente", dossier.numero_commande),
            json!({ "dossier": dossier }),
        )
        .urgent();
        let notification_id = notification.id;

        // The urgent notification already reaches every connection; no
        // separate refresh broadcast.
        let delivery = self
            .router
            .to_all(&ServerMessage::notification(notification))
            .await;

        self.record(delivery.delivered, delivery.failed, 0);
        NotificationMetrics::record(NotificationKind::DossierUrgent);

        DeliveryResult {
            notification_id,
            delivered_to: delivery.delivered,
            failed: delivery.failed,
            queued: 0,
            success: delivery.delivered > 0,
        }
    }

    /// Deadlines are approaching: one notification per dossier, routed by
    /// its current status, always including admin.
    #[tracing::instrument(
        name = "dispatcher.echeances_proches",
        skip(self, dossiers),
        fields(dossier_count = dossiers.len())
    )]
    pub async fn notify_echeances_proches(&self, dossiers: &[Dossier]) -> Vec<DeliveryResult> {
        let mut results = Vec::with_capacity(dossiers.len());

        for dossier in dossiers {
            let mut targets = Targets::new();
            match dossier.status() {
                Some(DossierStatus::EnCours) | Some(DossierStatus::ARevoir) => {
                    push_target(&mut targets, Target::Role(UserRole::Preparateur));
                }
                Some(DossierStatus::EnImpression) => {
                    push_target(&mut targets, Target::Role(dossier.machine.operator_role()));
                }
                Some(DossierStatus::Termine) => {
                    push_target(&mut targets, Target::Role(UserRole::Livreur));
                }
                _ => {}
            }
            push_target(&mut targets, Target::Role(UserRole::Admin));

            let message = match dossier.date_limite {
                Some(date) => format!(
                    "Échéance de la commande {} le {}",
                    dossier.numero_commande,
                    date.format("%d/%m/%Y")
                ),
                None => format!("Échéance proche pour la commande {}", dossier.numero_commande),
            };

            let notification = Notification::new(
                NotificationKind::EcheanceProche,
                "Échéance proche",
                message,
                json!({ "dossier": dossier }),
            );

            let result = self.dispatch(targets, notification).await;
            self.emit_refresh(dossier, None, &dossier.statut, None, None).await;
            results.push(result);
        }

        results
    }

    /// Resolve targets to connections, deliver once per connection, and park
    /// the notification for offline direct recipients.
    async fn dispatch(&self, targets: Targets, notification: Notification) -> DeliveryResult {
        let notification_id = notification.id;
        let kind = notification.kind;
        let message = ServerMessage::notification(notification.clone());

        // A user can match both a role group and a direct-identity target;
        // dedupe at the connection level so they hear the event once.
        let mut seen = HashSet::new();
        let mut connections = Vec::new();
        let mut offline = Vec::new();

        for target in &targets {
            match target {
                Target::Role(role) => {
                    for conn in self.registry.get_role_connections(*role) {
                        if seen.insert(conn.id) {
                            connections.push(conn);
                        }
                    }
                }
                Target::User(user_id) => match self.registry.get(user_id) {
                    Some(conn) => {
                        if seen.insert(conn.id) {
                            connections.push(conn);
                        }
                    }
                    None => offline.push(user_id.clone()),
                },
            }
        }

        let delivery = self.router.deliver(&connections, &message).await;

        let mut queued = 0;
        if self.store.is_enabled() {
            for user_id in &offline {
                match self.store.enqueue(user_id, notification.clone()).await {
                    Ok(()) => queued += 1,
                    Err(e) => {
                        tracing::warn!(
                            user_id = %user_id,
                            notification_id = %notification_id,
                            error = %e,
                            "Failed to park notification for offline recipient"
                        );
                    }
                }
            }
        }

        self.record(delivery.delivered, delivery.failed, queued);
        NotificationMetrics::record(kind);

        tracing::debug!(
            notification_id = %notification_id,
            kind = %kind,
            delivered = delivery.delivered,
            failed = delivery.failed,
            queued = queued,
            "Dispatched notification"
        );

        DeliveryResult {
            notification_id,
            delivered_to: delivery.delivered,
            failed: delivery.failed,
            queued,
            success: delivery.delivered > 0,
        }
    }

    /// Broadcast refresh signal so every open dashboard re-renders its view,
    /// independently of the targeted notification.
    async fn emit_refresh(
        &self,
        dossier: &Dossier,
        old_status: Option<&str>,
        new_status: &str,
        changed_by: Option<&str>,
        comment: Option<&str>,
    ) {
        let message = ServerMessage::DossierStatusChanged {
            dossier: dossier.clone(),
            old_status: old_status.map(str::to_string),
            new_status: new_status.to_string(),
            changed_by: changed_by.map(str::to_string),
            comment: comment.map(str::to_string),
        };
        self.router.to_all(&message).await;
    }

    fn push_creator(&self, targets: &mut Targets, dossier: &Dossier) {
        match &dossier.cree_par {
            Some(creator) => push_target(targets, Target::User(creator.clone())),
            None => {
                tracing::warn!(
                    numero_commande = %dossier.numero_commande,
                    "Dossier has no creator identity, skipping creator notification"
                );
            }
        }
    }

    fn record(&self, delivered: usize, failed: usize, queued: usize) {
        self.stats.total_sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats
            .total_failed
            .fetch_add(failed as u64, Ordering::Relaxed);
        self.stats
            .total_queued
            .fetch_add(queued as u64, Ordering::Relaxed);
    }
}

fn push_target(targets: &mut Targets, target: Target) {
    if !targets.contains(&target) {
        targets.push(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PendingQueueConfig;
    use crate::domain::Machine;
    use crate::notification::MemoryPendingStore;
    use tokio::sync::mpsc;

    fn test_dispatcher() -> (Arc<ConnectionRegistry>, NotificationDispatcher) {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(Router::new(registry.clone()));
        let store = Arc::new(MemoryPendingStore::new(PendingQueueConfig::default()));
        let dispatcher = NotificationDispatcher::new(registry.clone(), router, store);
        (registry, dispatcher)
    }

    fn test_dossier(statut: &str) -> Dossier {
        Dossier {
            id: Some("d-1".to_string()),
            numero_commande: "CMD-1".to_string(),
            client: None,
            cree_par: Some("u1".to_string()),
            machine: Machine::Roland,
            statut: statut.to_string(),
            date_limite: None,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_urgent_is_single_broadcast_with_flag() {
        let (registry, dispatcher) = test_dispatcher();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register("admin-1".to_string(), UserRole::Admin, tx);

        let result = dispatcher.notify_dossier_urgent(&test_dossier("En cours")).await;
        assert!(result.success);
        assert_eq!(result.delivered_to, 1);

        // Exactly one event, the urgent notification itself
        let msg = rx.try_recv().unwrap();
        let parsed: ServerMessage = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        match parsed {
            ServerMessage::Notification { notification } => {
                assert!(notification.urgent);
                assert_eq!(notification.kind, NotificationKind::DossierUrgent);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_status_change_urgent_flag_only_for_a_revoir() {
        let (registry, dispatcher) = test_dispatcher();
        let (tx, mut rx) = mpsc::channel(16);
        registry.register("u1".to_string(), UserRole::Preparateur, tx);

        let dossier = test_dossier("En cours");
        dispatcher
            .notify_changement_statut(&dossier, "En cours", "À revoir", "op-1", None)
            .await;

        let mut saw_urgent = false;
        while let Ok(msg) = rx.try_recv() {
            let parsed: ServerMessage =
                serde_json::from_str(&msg.to_json().unwrap()).unwrap();
            if let ServerMessage::Notification { notification } = parsed {
                assert_eq!(notification.kind, NotificationKind::ChangementStatut);
                saw_urgent = notification.urgent;
            }
        }
        assert!(saw_urgent);
    }

    #[tokio::test]
    async fn test_offline_creator_is_queued() {
        let (_registry, dispatcher) = test_dispatcher();

        let dossier = test_dossier("En impression");
        let result = dispatcher
            .notify_changement_statut(&dossier, "En impression", "Livré", "livreur-1", None)
            .await;

        // Nobody connected: the creator-targeted copy is parked
        assert_eq!(result.delivered_to, 0);
        assert_eq!(result.queued, 1);
    }

    #[tokio::test]
    async fn test_unknown_status_routes_admin_only() {
        let (registry, dispatcher) = test_dispatcher();
        let (tx_admin, mut rx_admin) = mpsc::channel(16);
        let (tx_op, mut rx_op) = mpsc::channel(16);
        registry.register("a1".to_string(), UserRole::Admin, tx_admin);
        registry.register("op1".to_string(), UserRole::ImprimeurRoland, tx_op);

        let dossier = test_dossier("En cours");
        dispatcher
            .notify_changement_statut(&dossier, "En cours", "Archivé", "a1", None)
            .await;

        let admin_notifications = drain_notifications(&mut rx_admin);
        let op_notifications = drain_notifications(&mut rx_op);
        assert_eq!(admin_notifications, 1);
        assert_eq!(op_notifications, 0);
    }

    fn drain_notifications(
        rx: &mut mpsc::Receiver<crate::websocket::OutboundMessage>,
    ) -> usize {
        let mut count = 0;
        while let Ok(msg) = rx.try_recv() {
            let parsed: ServerMessage =
                serde_json::from_str(&msg.to_json().unwrap()).unwrap();
            if matches!(parsed, ServerMessage::Notification { .. }) {
                count += 1;
            }
        }
        count
    }
}
