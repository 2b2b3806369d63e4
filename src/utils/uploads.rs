use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::errors::AppError;

const ALLOWED_EXTENSIONS: [&str; 7] = ["jpeg", "jpg", "png", "gif", "pdf", "doc", "docx"];

const ALLOWED_MIME_TYPES: [&str; 7] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/zip",
];

/// A file received with a leave request, held in memory until the request
/// has passed every check.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub original_name: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

fn rejected() -> AppError {
    AppError::bad_request("Invalid File", "Only image, PDF, and document files are allowed")
}

pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

/// Checks the name's extension and the sniffed content type.
pub fn check_attachment(original_name: &str, bytes: Vec<u8>, max_size: usize) -> Result<Attachment, AppError> {
    if bytes.len() > max_size {
        return Err(AppError::bad_request(
            "File Too Large",
            format!("Each attachment must be at most {max_size} bytes"),
        ));
    }

    let extension = extension_of(original_name)
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(rejected)?;

    let kind = infer::get(&bytes).ok_or_else(rejected)?;
    if !ALLOWED_MIME_TYPES.contains(&kind.mime_type()) {
        tracing::info!(
            file = original_name,
            mime = kind.mime_type(),
            "Rejected attachment with disallowed content"
        );
        return Err(rejected());
    }

    Ok(Attachment {
        original_name: original_name.to_string(),
        extension,
        bytes,
    })
}

pub fn stored_file_name(extension: &str) -> String {
    format!("leave-{}.{}", Uuid::new_v4(), extension)
}

/// Writes the attachments under `upload_dir` and returns their paths in order.
pub async fn save_attachments(upload_dir: &str, attachments: &[Attachment]) -> Result<Vec<String>, AppError> {
    if attachments.is_empty() {
        return Ok(Vec::new());
    }

    let dir = PathBuf::from(upload_dir);
    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
        tracing::error!(error = %e, dir = upload_dir, "Failed to create upload directory");
        AppError::internal("Upload Failed", "Could not store the attachment")
    })?;

    let mut paths = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        let path = dir.join(stored_file_name(&attachment.extension));
        tokio::fs::write(&path, &attachment.bytes).await.map_err(|e| {
            tracing::error!(error = %e, file = %attachment.original_name, "Failed to write attachment");
            AppError::internal("Upload Failed", "Could not store the attachment")
        })?;
        paths.push(path.to_string_lossy().into_owned());
    }

    Ok(paths)
}

/// Best-effort cleanup for files whose leave was never stored.
pub async fn remove_attachments(paths: &[String]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(error = %e, path = %path, "Failed to remove orphaned attachment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const PDF: &[u8] = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n";

    #[test]
    fn accepts_images_and_pdfs() {
        let png = check_attachment("Doctor Note.PNG", PNG.to_vec(), 1024).unwrap();
        assert_eq!(png.extension, "png");
        assert!(check_attachment("note.pdf", PDF.to_vec(), 1024).is_ok());
    }

    #[test]
    fn rejects_disallowed_extensions() {
        let err = check_attachment("setup.exe", PNG.to_vec(), 1024).unwrap_err();
        assert!(err.to_string().contains("Only image, PDF, and document files are allowed"));
        assert!(check_attachment("no_extension", PNG.to_vec(), 1024).is_err());
    }

    #[test]
    fn rejects_unrecognised_content() {
        assert!(check_attachment("note.pdf", b"plain text".to_vec(), 1024).is_err());
    }

    #[test]
    fn rejects_oversized_files() {
        let err = check_attachment("note.pdf", PDF.to_vec(), 4).unwrap_err();
        assert!(err.to_string().contains("File Too Large"));
    }

    #[test]
    fn stored_names_are_unique_and_keep_the_extension() {
        let a = stored_file_name("pdf");
        let b = stored_file_name("pdf");
        assert!(a.starts_with("leave-") && a.ends_with(".pdf"));
        assert_ne!(a, b);
    }

    #[actix_web::test]
    async fn saves_files_under_the_upload_directory() {
        let dir = std::env::temp_dir().join(format!("leave-desk-uploads-{}", Uuid::new_v4()));
        let dir = dir.to_string_lossy().into_owned();
        let attachment = check_attachment("note.pdf", PDF.to_vec(), 1024).unwrap();

        let paths = save_attachments(&dir, &[attachment]).await.unwrap();

        assert_eq!(paths.len(), 1);
        assert!(paths[0].starts_with(&dir));
        assert_eq!(tokio::fs::read(&paths[0]).await.unwrap(), PDF);

        remove_attachments(&paths).await;
        assert!(tokio::fs::metadata(&paths[0]).await.is_err());
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
