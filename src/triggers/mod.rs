mod http;

pub use http::{
    dossier_created, dossier_deadlines, dossier_file_uploaded, dossier_status_changed,
    dossier_urgent, DeadlinesRequest, DeadlinesResponse, DossierCreatedRequest,
    DossierUrgentRequest, FileUploadedRequest, StatusChangedRequest, TriggerResponse,
};
