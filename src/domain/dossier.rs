use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Machine;

/// Parsed dossier status, as far as routing is concerned.
///
/// The valid transitions between statuses belong to the order-management
/// application; this service only maps status labels to recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DossierStatus {
    EnCours,
    ARevoir,
    EnImpression,
    Imprime,
    PretALivrer,
    Termine,
    Livre,
}

impl DossierStatus {
    /// Parse a status label from the order-management domain.
    ///
    /// Unknown labels return `None`; the dispatcher routes those to the
    /// admin group only.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "En cours" => Some(DossierStatus::EnCours),
            "À revoir" => Some(DossierStatus::ARevoir),
            "En impression" => Some(DossierStatus::EnImpression),
            "Imprimé" => Some(DossierStatus::Imprime),
            "Prêt à livrer" => Some(DossierStatus::PretALivrer),
            "Terminé" => Some(DossierStatus::Termine),
            "Livré" => Some(DossierStatus::Livre),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DossierStatus::EnCours => "En cours",
            DossierStatus::ARevoir => "À revoir",
            DossierStatus::EnImpression => "En impression",
            DossierStatus::Imprime => "Imprimé",
            DossierStatus::PretALivrer => "Prêt à livrer",
            DossierStatus::Termine => "Terminé",
            DossierStatus::Livre => "Livré",
        }
    }
}

impl std::fmt::Display for DossierStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Order record as received from the order-management application.
///
/// Only the fields that drive routing are modeled; everything else the
/// caller sends is carried through `extra` untouched so dashboards receive
/// the full entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dossier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub numero_commande: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    /// Identity of the preparer who created the order. Drives the
    /// creator-targeted rows of the routing tables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cree_par: Option<String>,
    pub machine: Machine,
    #[serde(default)]
    pub statut: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_limite: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Dossier {
    /// Parsed current status, if the label is one the routing tables know.
    pub fn status(&self) -> Option<DossierStatus> {
        DossierStatus::parse(&self.statut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_labels_round_trip() {
        for status in [
            DossierStatus::EnCours,
            DossierStatus::ARevoir,
            DossierStatus::EnImpression,
            DossierStatus::Imprime,
            DossierStatus::PretALivrer,
            DossierStatus::Termine,
            DossierStatus::Livre,
        ] {
            assert_eq!(DossierStatus::parse(status.label()), Some(status));
        }
    }

    #[test]
    fn test_unknown_status_is_none() {
        assert_eq!(DossierStatus::parse("Archivé"), None);
        assert_eq!(DossierStatus::parse(""), None);
    }

    #[test]
    fn test_dossier_minimal_payload() {
        let dossier: Dossier = serde_json::from_value(json!({
            "machine": "Roland",
            "numero_commande": "CMD-1"
        }))
        .unwrap();

        assert_eq!(dossier.numero_commande, "CMD-1");
        assert_eq!(dossier.machine, Machine::Roland);
        assert_eq!(dossier.status(), None);
    }

    #[test]
    fn test_dossier_extra_fields_survive() {
        let dossier: Dossier = serde_json::from_value(json!({
            "id": "d-42",
            "machine": "Xerox",
            "numero_commande": "CMD-42",
            "statut": "En impression",
            "quantite": 500,
            "format": "A3"
        }))
        .unwrap();

        assert_eq!(dossier.status(), Some(DossierStatus::EnImpression));
        let back = serde_json::to_value(&dossier).unwrap();
        assert_eq!(back["quantite"], 500);
        assert_eq!(back["format"], "A3");
    }
}
