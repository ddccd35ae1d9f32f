use actix_web::{
    HttpResponse, get, post,
    web::{Data, Path, ServiceConfig, scope},
};
use actix_multipart::form::{MultipartForm, bytes::Bytes};

use crate::api::analysis::service::{AnalysisService, ServiceError};
use crate::api::auth::AuthenticatedUser;

#[derive(MultipartForm)]
pub struct UploadForm {
    #[multipart(rename = "file")]
    pub file: Bytes,
}

/// Accept a statement upload and start an analysis job.
///
/// Responds as soon as the job is created; analysis runs in the
/// background and is observed through the list/detail endpoints.
#[post("")]
async fn submit_analysis(
    service: Data<AnalysisService>,
    user: AuthenticatedUser,
    MultipartForm(form): MultipartForm<UploadForm>,
) -> Result<HttpResponse, ServiceError> {
    let file_name = form
        .file
        .file_name
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ServiceError::InvalidRequest("File is required".to_string()))?;

    if form.file.data.is_empty() {
        return Err(ServiceError::InvalidRequest(
            "Uploaded file is empty".to_string(),
        ));
    }

    let ack = service
        .submit(file_name, form.file.data.to_vec(), &user.0)
        .await?;

    Ok(HttpResponse::Created().json(ack))
}

#[get("")]
async fn list_analyses(
    service: Data<AnalysisService>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, ServiceError> {
    let analyses = service.list_for_user(&user.0).await?;
    Ok(HttpResponse::Ok().json(analyses))
}

#[get("/{code}")]
async fn get_analysis_detail(
    service: Data<AnalysisService>,
    user: AuthenticatedUser,
    path: Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let code = path.into_inner();
    let detail = service.get_detail(&code, &user.0).await?;
    Ok(HttpResponse::Ok().json(detail))
}

pub fn analysis_config(config: &mut ServiceConfig) {
    config.service(
        scope("analyses")
            .service(submit_analysis)
            .service(list_analyses)
            .service(get_analysis_detail),
    );
}
