//! Cross-component integration tests
//!
//! These tests exercise registry, router, dispatcher and pending store
//! together over fake mpsc transports, without server startup.

use std::sync::Arc;

use tokio::sync::mpsc;

use atelier_notification_service::config::PendingQueueConfig;
use atelier_notification_service::connection_manager::ConnectionRegistry;
use atelier_notification_service::domain::{Dossier, Machine, UserRole};
use atelier_notification_service::notification::{
    MemoryPendingStore, Notification, NotificationDispatcher, NotificationKind, PendingStore,
};
use atelier_notification_service::router::Router;
use atelier_notification_service::websocket::{OutboundMessage, ServerMessage};

struct TestEnvironment {
    registry: Arc<ConnectionRegistry>,
    router: Arc<Router>,
    dispatcher: Arc<NotificationDispatcher>,
    store: Arc<dyn PendingStore>,
}

fn create_test_environment() -> TestEnvironment {
    let registry = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(Router::new(registry.clone()));
    let store: Arc<dyn PendingStore> = Arc::new(MemoryPendingStore::new(PendingQueueConfig {
        enabled: true,
        max_per_user: 100,
        notification_ttl_seconds: 3600,
    }));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        registry.clone(),
        router.clone(),
        store.clone(),
    ));

    TestEnvironment {
        registry,
        router,
        dispatcher,
        store,
    }
}

/// Register a fake transport and return its capture channel
fn connect(
    env: &TestEnvironment,
    user: &str,
    role: UserRole,
) -> mpsc::Receiver<OutboundMessage> {
    let (tx, rx) = mpsc::channel(64);
    env.registry.register(user.to_string(), role, tx);
    rx
}

/// Drain everything the fake transport captured so far
fn received(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        let text = msg.to_json().expect("outbound message should serialize");
        messages.push(serde_json::from_str(&text).expect("server message should parse"));
    }
    messages
}

/// Only the wrapped business notifications among the captured messages
fn notifications(messages: &[ServerMessage]) -> Vec<Notification> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Notification { notification } => Some(notification.clone()),
            _ => None,
        })
        .collect()
}

fn dossier(numero: &str, machine: Machine, statut: &str, cree_par: Option<&str>) -> Dossier {
    Dossier {
        id: Some(format!("d-{}", numero)),
        numero_commande: numero.to_string(),
        client: Some("Imprimerie Dupont".to_string()),
        cree_par: cree_par.map(str::to_string),
        machine,
        statut: statut.to_string(),
        date_limite: None,
        extra: Default::default(),
    }
}

// =============================================================================
// Registry Tests
// =============================================================================

mod registry_tests {
    use super::*;

    #[tokio::test]
    async fn test_reregistration_is_total_replacement() {
        let env = create_test_environment();

        let mut rx1 = connect(&env, "u1", UserRole::Preparateur);
        let mut rx2 = connect(&env, "u1", UserRole::Preparateur);

        // Only the second transport receives direct messages now
        let delivered = env.router.to_user("u1", &ServerMessage::HeartbeatAck).await;
        assert!(delivered);
        assert!(received(&mut rx2).len() == 1);
        assert!(received(&mut rx1).is_empty());

        // And only one connection exists in the role group
        let delivery = env
            .router
            .to_role(UserRole::Preparateur, &ServerMessage::Heartbeat)
            .await;
        assert_eq!(delivery.delivered, 1);
    }

    #[tokio::test]
    async fn test_unregister_makes_identity_unreachable() {
        let env = create_test_environment();

        let _rx = connect(&env, "u1", UserRole::Livreur);
        let handle = env.registry.get("u1").unwrap();

        assert!(env.registry.unregister(handle.id));
        assert!(env.registry.get("u1").is_none());
        assert!(!env.router.to_user("u1", &ServerMessage::HeartbeatAck).await);
    }
}

// =============================================================================
// Router Tests
// =============================================================================

mod router_tests {
    use super::*;

    #[tokio::test]
    async fn test_to_user_truth_table() {
        let env = create_test_environment();
        let mut rx = connect(&env, "u1", UserRole::Admin);

        // Present at call time: true, message arrives
        assert!(env.router.to_user("u1", &ServerMessage::HeartbeatAck).await);
        assert_eq!(received(&mut rx).len(), 1);

        // Absent: false, and no transport receives anything
        assert!(!env.router.to_user("u2", &ServerMessage::HeartbeatAck).await);
        assert!(received(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_to_role_delivers_to_exactly_that_role() {
        let env = create_test_environment();
        let mut rx_livreur_a = connect(&env, "livreur-a", UserRole::Livreur);
        let mut rx_livreur_b = connect(&env, "livreur-b", UserRole::Livreur);
        let mut rx_admin = connect(&env, "admin-1", UserRole::Admin);
        let mut rx_op = connect(&env, "op-1", UserRole::ImprimeurXerox);

        let delivery = env
            .router
            .to_role(UserRole::Livreur, &ServerMessage::Heartbeat)
            .await;

        assert_eq!(delivery.delivered, 2);
        assert_eq!(received(&mut rx_livreur_a).len(), 1);
        assert_eq!(received(&mut rx_livreur_b).len(), 1);
        assert!(received(&mut rx_admin).is_empty());
        assert!(received(&mut rx_op).is_empty());
    }
}

// =============================================================================
// Dispatcher Routing Tests
// =============================================================================

mod dispatcher_tests {
    use super::*;

    #[tokio::test]
    async fn test_new_dossier_reaches_operator_and_admin_not_creator() {
        let env = create_test_environment();
        let mut rx_creator = connect(&env, "u1", UserRole::Preparateur);
        let mut rx_admin = connect(&env, "u2", UserRole::Admin);
        let mut rx_roland = connect(&env, "op-roland", UserRole::ImprimeurRoland);
        let mut rx_xerox = connect(&env, "op-xerox", UserRole::ImprimeurXerox);

        let dossier = dossier("CMD-1", Machine::Roland, "En cours", Some("u1"));
        let result = env.dispatcher.notify_nouveau_dossier(&dossier, "u1").await;
        assert!(result.success);

        assert_eq!(notifications(&received(&mut rx_roland)).len(), 1);
        assert_eq!(notifications(&received(&mut rx_admin)).len(), 1);
        // The creator gets the broadcast refresh but no targeted notification
        let creator_messages = received(&mut rx_creator);
        assert!(notifications(&creator_messages).is_empty());
        assert!(creator_messages
            .iter()
            .any(|m| matches!(m, ServerMessage::DossierStatusChanged { .. })));
        // The other machine's operator group hears nothing targeted
        assert!(notifications(&received(&mut rx_xerox)).is_empty());
    }

    #[tokio::test]
    async fn test_status_termine_reaches_livreur_and_admin_only() {
        let env = create_test_environment();
        let mut rx_creator = connect(&env, "u1", UserRole::Preparateur);
        let mut rx_livreur = connect(&env, "livreur-1", UserRole::Livreur);
        let mut rx_admin = connect(&env, "admin-1", UserRole::Admin);
        let mut rx_op = connect(&env, "op-1", UserRole::ImprimeurRoland);

        let dossier = dossier("CMD-2", Machine::Roland, "En impression", Some("u1"));
        env.dispatcher
            .notify_changement_statut(&dossier, "En impression", "Terminé", "op-1", None)
            .await;

        assert_eq!(notifications(&received(&mut rx_livreur)).len(), 1);
        assert_eq!(notifications(&received(&mut rx_admin)).len(), 1);
        assert!(notifications(&received(&mut rx_creator)).is_empty());
        assert!(notifications(&received(&mut rx_op)).is_empty());
    }

    #[tokio::test]
    async fn test_status_livre_reaches_creator_and_admin_only() {
        let env = create_test_environment();
        let mut rx_creator = connect(&env, "u1", UserRole::Preparateur);
        let mut rx_livreur = connect(&env, "livreur-1", UserRole::Livreur);
        let mut rx_admin = connect(&env, "admin-1", UserRole::Admin);
        let mut rx_op = connect(&env, "op-1", UserRole::ImprimeurRoland);

        let dossier = dossier("CMD-3", Machine::Roland, "Terminé", Some("u1"));
        env.dispatcher
            .notify_changement_statut(&dossier, "Terminé", "Livré", "livreur-1", None)
            .await;

        assert_eq!(notifications(&received(&mut rx_creator)).len(), 1);
        assert_eq!(notifications(&received(&mut rx_admin)).len(), 1);
        assert!(notifications(&received(&mut rx_livreur)).is_empty());
        assert!(notifications(&received(&mut rx_op)).is_empty());
    }

    #[tokio::test]
    async fn test_status_change_urgent_flag() {
        let env = create_test_environment();
        let mut rx_admin = connect(&env, "admin-1", UserRole::Admin);

        let dossier = dossier("CMD-4", Machine::Xerox, "En cours", Some("u1"));

        env.dispatcher
            .notify_changement_statut(&dossier, "En cours", "À revoir", "op-1", Some("Fichier illisible"))
            .await;
        let urgent_batch = notifications(&received(&mut rx_admin));
        assert_eq!(urgent_batch.len(), 1);
        assert!(urgent_batch[0].urgent);

        env.dispatcher
            .notify_changement_statut(&dossier, "À revoir", "En impression", "u1", None)
            .await;
        let normal_batch = notifications(&received(&mut rx_admin));
        assert_eq!(normal_batch.len(), 1);
        assert!(!normal_batch[0].urgent);
    }

    #[tokio::test]
    async fn test_urgent_dossier_broadcast_to_everyone() {
        let env = create_test_environment();
        let mut rx_creator = connect(&env, "u1", UserRole::Preparateur);
        let mut rx_livreur = connect(&env, "livreur-1", UserRole::Livreur);
        let mut rx_admin = connect(&env, "admin-1", UserRole::Admin);

        let dossier = dossier("CMD-5", Machine::Roland, "En cours", Some("u1"));
        let result = env.dispatcher.notify_dossier_urgent(&dossier).await;
        assert_eq!(result.delivered_to, 3);

        for rx in [&mut rx_creator, &mut rx_livreur, &mut rx_admin] {
            let messages = received(rx);
            // Exactly one event arrives: the urgent notification itself
            assert_eq!(messages.len(), 1);
            let batch = notifications(&messages);
            assert_eq!(batch.len(), 1);
            assert!(batch[0].urgent);
            assert_eq!(batch[0].kind, NotificationKind::DossierUrgent);
        }
    }

    #[tokio::test]
    async fn test_file_uploaded_routing_depends_on_current_status() {
        let env = create_test_environment();
        let mut rx_preparateur = connect(&env, "prep-1", UserRole::Preparateur);
        let mut rx_op = connect(&env, "op-1", UserRole::ImprimeurXerox);
        let mut rx_admin = connect(&env, "admin-1", UserRole::Admin);

        // In preparation: sources go to the machine operators
        let en_cours = dossier("CMD-6", Machine::Xerox, "En cours", Some("prep-1"));
        env.dispatcher
            .notify_fichier_ajoute(&en_cours, "prep-1", Some("recto.pdf"))
            .await;
        assert_eq!(notifications(&received(&mut rx_op)).len(), 1);
        assert!(notifications(&received(&mut rx_preparateur)).is_empty());
        assert_eq!(notifications(&received(&mut rx_admin)).len(), 1);

        // While printing: new proofs go back to the preparer
        let en_impression = dossier("CMD-6", Machine::Xerox, "En impression", Some("prep-1"));
        env.dispatcher
            .notify_fichier_ajoute(&en_impression, "op-1", Some("bat.pdf"))
            .await;
        assert!(notifications(&received(&mut rx_op)).is_empty());
        assert_eq!(notifications(&received(&mut rx_preparateur)).len(), 1);
        assert_eq!(notifications(&received(&mut rx_admin)).len(), 1);
    }

    #[tokio::test]
    async fn test_deadlines_route_by_current_status() {
        let env = create_test_environment();
        let mut rx_preparateur = connect(&env, "prep-1", UserRole::Preparateur);
        let mut rx_roland = connect(&env, "op-roland", UserRole::ImprimeurRoland);
        let mut rx_livreur = connect(&env, "livreur-1", UserRole::Livreur);
        let mut rx_admin = connect(&env, "admin-1", UserRole::Admin);

        let dossiers = vec![
            dossier("CMD-7", Machine::Roland, "En cours", Some("prep-1")),
            dossier("CMD-8", Machine::Roland, "En impression", Some("prep-1")),
            dossier("CMD-9", Machine::Xerox, "Terminé", Some("prep-1")),
        ];
        let results = env.dispatcher.notify_echeances_proches(&dossiers).await;
        assert_eq!(results.len(), 3);

        // One per dossier routed to its responsible group
        assert_eq!(notifications(&received(&mut rx_preparateur)).len(), 1);
        assert_eq!(notifications(&received(&mut rx_roland)).len(), 1);
        assert_eq!(notifications(&received(&mut rx_livreur)).len(), 1);
        // Admin hears about every dossier
        assert_eq!(notifications(&received(&mut rx_admin)).len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_broadcast_accompanies_status_change() {
        let env = create_test_environment();
        let mut rx_op = connect(&env, "op-1", UserRole::ImprimeurRoland);

        let dossier = dossier("CMD-10", Machine::Roland, "En cours", Some("u1"));
        env.dispatcher
            .notify_changement_statut(&dossier, "En cours", "Terminé", "op-1", None)
            .await;

        // The operator is not a recipient for Terminé, but still gets the
        // untargeted refresh signal with the transition details
        let messages = received(&mut rx_op);
        assert!(notifications(&messages).is_empty());
        match messages
            .iter()
            .find(|m| matches!(m, ServerMessage::DossierStatusChanged { .. }))
        {
            Some(ServerMessage::DossierStatusChanged {
                old_status,
                new_status,
                changed_by,
                ..
            }) => {
                assert_eq!(old_status.as_deref(), Some("En cours"));
                assert_eq!(new_status, "Terminé");
                assert_eq!(changed_by.as_deref(), Some("op-1"));
            }
            _ => panic!("expected a dossier_status_changed broadcast"),
        }
    }
}

// =============================================================================
// Pending Store Tests
// =============================================================================

mod store_tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_creator_notification_is_parked_and_replayed() {
        let env = create_test_environment();
        let _rx_admin = connect(&env, "admin-1", UserRole::Admin);

        // Creator u1 is offline when their dossier is delivered
        let dossier = dossier("CMD-11", Machine::Roland, "Terminé", Some("u1"));
        let result = env
            .dispatcher
            .notify_changement_statut(&dossier, "Terminé", "Livré", "livreur-1", None)
            .await;
        assert_eq!(result.queued, 1);

        // On reconnect the parked notification is drained exactly once
        let replayed = env.store.drain("u1").await;
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].kind, NotificationKind::ChangementStatut);
        assert!(env.store.drain("u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_group_deliveries_are_never_parked() {
        let env = create_test_environment();

        // Nobody is connected at all
        let dossier = dossier("CMD-12", Machine::Roland, "En impression", Some("u1"));
        let result = env
            .dispatcher
            .notify_changement_statut(&dossier, "En cours", "En impression", "prep-1", None)
            .await;

        // Operator and admin groups were empty; nothing is parked for them
        assert_eq!(result.delivered_to, 0);
        assert_eq!(result.queued, 0);
        assert_eq!(env.store.stats().await.total_pending, 0);
    }
}
