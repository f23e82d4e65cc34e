//! Multipart upload extraction. The whole body is buffered first; uploads
//! here are single small images, not streams worth chunking.

use tide::Request;

pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Pulls the uploaded file out of `field_name` in a multipart request.
/// Returns `None` when the request isn't multipart, the field is absent, or
/// no filename was supplied.
pub async fn uploaded_file(
    req: &mut Request<crate::State>,
    field_name: &str,
) -> tide::Result<Option<UploadedFile>> {
    let content_type = match req.header("Content-Type") {
        Some(values) => values.last().as_str().to_string(),
        None => return Ok(None),
    };

    let body = req.body_bytes().await?;

    Ok(parse_upload(body, &content_type, field_name).await?)
}

async fn parse_upload(
    body: Vec<u8>,
    content_type: &str,
    field_name: &str,
) -> Result<Option<UploadedFile>, multer::Error> {
    let boundary = match multer::parse_boundary(content_type) {
        Ok(boundary) => boundary,
        Err(_) => return Ok(None),
    };

    let stream = futures_lite::stream::once(Ok::<_, std::io::Error>(body));
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(field_name) {
            continue;
        }

        let filename = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Ok(None),
        };
        let bytes = field.bytes().await?.to_vec();

        return Ok(Some(UploadedFile { filename, bytes }));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "------------------------d74496d66958873e";

    fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    #[async_std::test]
    async fn extracts_filename_and_bytes() {
        let body = multipart_body("form_file", "cat.jpg", b"\xff\xd8\xff\xe0jpeg");

        let upload = parse_upload(body, &content_type(), "form_file")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(upload.filename, "cat.jpg");
        assert_eq!(upload.bytes, b"\xff\xd8\xff\xe0jpeg".to_vec());
    }

    #[async_std::test]
    async fn wrong_field_name_yields_none() {
        let body = multipart_body("other_field", "cat.jpg", b"data");

        let upload = parse_upload(body, &content_type(), "form_file")
            .await
            .unwrap();

        assert!(upload.is_none());
    }

    #[async_std::test]
    async fn missing_filename_yields_none() {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"form_file\"\r\n\r\n");
        body.extend_from_slice(b"data");
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        let upload = parse_upload(body, &content_type(), "form_file")
            .await
            .unwrap();

        assert!(upload.is_none());
    }

    #[async_std::test]
    async fn non_multipart_content_type_yields_none() {
        let upload = parse_upload(b"{}".to_vec(), "application/json", "form_file")
            .await
            .unwrap();

        assert!(upload.is_none());
    }
}
