use base64::Engine;
use tide::{Redirect, Request, Response};

use crate::store::{self, metadata, ObjectProvider};
use crate::web::forms;
use crate::FilePageMode;

mod utils;

/// Form field the upload page submits the image under.
const UPLOAD_FIELD: &str = "form_file";

pub(in super::super) fn mount(route: &mut tide::Server<crate::State>) {
    route.at("/").get(gallery);
    route.at("/sitemap.xml").get(sitemap);

    route.at("/upload").post(upload);

    route.at("/files/:filename").get(file_page);
    route.at("/files/:filename/raw").get(file_raw);
}

async fn gallery(req: Request<crate::State>) -> tide::Result<Response> {
    let state = req.state();

    let mut images = state.bucket.list_with_suffixes(store::IMAGE_SUFFIXES).await?;
    images.sort();

    let mut context = tera::Context::new();
    context.insert("title", "gallery");
    context.insert("canonical_href", &format!("{}/", state.args.base_url));
    context.insert("upload_field", UPLOAD_FIELD);
    context.insert("images", &images);

    let body = utils::render(state, "gallery.html", &context)?;
    let res = Response::builder(tide::http::StatusCode::Ok)
        .content_type("text/html")
        .body(body)
        .build();
    Ok(res)
}

/// Stores the image, captions it, stores the caption, and sends the client
/// back to the gallery. Caption failures are degraded inside the captioner
/// and never fail the upload; storage failures do.
async fn upload(mut req: Request<crate::State>) -> tide::Result<Response> {
    let upload = match forms::uploaded_file(&mut req, UPLOAD_FIELD).await? {
        Some(upload) => upload,
        None => {
            return Ok(Response::builder(tide::http::StatusCode::BadRequest)
                .body(format!("expected an uploaded file in the {:?} field", UPLOAD_FIELD))
                .build())
        },
    };

    let state = req.state();

    if state.args.require_jpeg {
        match image::guess_format(&upload.bytes) {
            Ok(image::ImageFormat::Jpeg) => {},
            _ => {
                return Ok(Response::builder(tide::http::StatusCode::BadRequest)
                    .body("only JPEG uploads are accepted")
                    .build())
            },
        }
    }

    if state.bucket.blob_exists(&upload.filename).await? {
        // Last writer wins, on the image and its metadata both.
        tracing::warn!(filename = %upload.filename, "overwriting existing image");
    }

    let locator = state
        .bucket
        .write_blob(&upload.filename, &upload.bytes, None)
        .await?;
    tracing::info!(filename = %upload.filename, %locator, "stored uploaded image");

    let caption = state.captioner.generate(&upload.bytes).await;

    metadata::save(&state.bucket, &upload.filename, &caption).await?;
    tracing::info!(filename = %upload.filename, title = %caption.title, "stored image metadata");

    Ok(Redirect::new("/").into())
}

async fn file_page(req: Request<crate::State>) -> tide::Result<Response> {
    let filename = decoded_filename(&req)?;
    let state = req.state();

    let bytes = match state.bucket.read_blob(&filename).await {
        Ok(bytes) => bytes,
        Err(store::Error::NotFound { .. }) => {
            return Ok(Response::builder(tide::http::StatusCode::NotFound).build())
        },
        Err(err) => return Err(err.into()),
    };

    match state.args.file_page {
        FilePageMode::Raw => Ok(image_response(bytes)),
        FilePageMode::Detail => {
            let caption = metadata::load(&state.bucket, &filename).await?;

            let mut context = tera::Context::new();
            context.insert("title", &caption.title);
            context.insert("description", &caption.description);
            context.insert("filename", &filename);
            context.insert(
                "canonical_href",
                &format!("{}/files/{}", state.args.base_url, filename),
            );
            context.insert(
                "image_src",
                &format!(
                    "data:image/jpeg;base64,{}",
                    base64::engine::general_purpose::STANDARD.encode(&bytes)
                ),
            );

            let body = utils::render(state, "file.html", &context)?;
            let res = Response::builder(tide::http::StatusCode::Ok)
                .content_type("text/html")
                .body(body)
                .build();
            Ok(res)
        },
    }
}

async fn file_raw(req: Request<crate::State>) -> tide::Result<Response> {
    let filename = decoded_filename(&req)?;
    let state = req.state();

    match state.bucket.read_blob(&filename).await {
        Ok(bytes) => Ok(image_response(bytes)),
        Err(store::Error::NotFound { .. }) => {
            Ok(Response::builder(tide::http::StatusCode::NotFound).build())
        },
        Err(err) => Err(err.into()),
    }
}

async fn sitemap(req: Request<crate::State>) -> tide::Result<Response> {
    let state = req.state();

    let mut buf = Vec::new();
    let sitemap_writer = sitemap::writer::SiteMapWriter::new(&mut buf);
    let mut urlwriter = sitemap_writer.start_urlset()?;

    urlwriter.url(format!("{}/", state.args.base_url))?;

    for image in state.bucket.list_with_suffixes(store::IMAGE_SUFFIXES).await? {
        urlwriter.url(format!("{}/files/{}", state.args.base_url, image))?;
    }

    urlwriter.end()?;

    let res = Response::builder(tide::http::StatusCode::Ok)
        .body(buf)
        .content_type(tide::http::mime::XML)
        .build();
    Ok(res)
}

fn decoded_filename(req: &Request<crate::State>) -> tide::Result<String> {
    let raw = req.param("filename")?;
    Ok(percent_encoding::percent_decode_str(raw)
        .decode_utf8_lossy()
        .to_string())
}

fn image_response(bytes: Vec<u8>) -> Response {
    Response::builder(tide::http::StatusCode::Ok)
        .content_type("image/jpeg")
        .body(bytes)
        .build()
}
