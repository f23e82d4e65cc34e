use std::sync::Arc;

use s3::bucket::Bucket;
use structopt::StructOpt;

pub mod caption;
pub mod models;
pub mod secrets;
pub mod store;
pub mod telemetry;
pub mod web;

#[derive(Clone, Debug)]
pub struct State {
    pub args: Arc<Args>,
    pub bucket: Bucket,
    pub captioner: Arc<caption::Captioner>,
    pub tera: Arc<tera::Tera>,
}

#[derive(Debug)]
pub enum Error {
    TemplateParseError(tera::Error),
    TelemetryInitError(anyhow::Error),
    SecretResolutionError(secrets::Error),
    StoreInitError(anyhow::Error),
}

impl From<Error> for u8 {
    fn from(error: Error) -> u8 {
        match error {
            Error::TemplateParseError(_) => 3,
            Error::TelemetryInitError(_) => 4,
            Error::SecretResolutionError(_) => 5,
            Error::StoreInitError(_) => 6,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::TemplateParseError(err) => {
                write!(f, "Template parsing error: {}", err)
            },
            Error::TelemetryInitError(err) => {
                write!(f, "Failed to init telemetry: {}", err)
            },
            Error::SecretResolutionError(err) => {
                write!(f, "Failed to resolve Gemini API key: {}", err)
            },
            Error::StoreInitError(err) => {
                write!(f, "Failed to set up object store client: {}", err)
            },
        }
    }
}

/// How `GET /files/:filename` renders a stored image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FilePageMode {
    /// HTML detail page with the image inlined and its caption shown.
    Detail,
    /// The stored bytes themselves, served as `image/jpeg`.
    Raw,
}

impl std::str::FromStr for FilePageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detail" => Ok(FilePageMode::Detail),
            "raw" => Ok(FilePageMode::Raw),
            other => Err(format!("unknown file page mode: {}", other)),
        }
    }
}

#[derive(Debug, StructOpt)]
pub struct Args {
    /// Host address to bind to.
    #[structopt(long, default_value = "localhost", env = "SNAPNOTE_BIND_ADDRESS")]
    address: String,
    /// Port to bind to.
    #[structopt(long, default_value = "8080", env = "SNAPNOTE_BIND_PORT")]
    port: u16,

    /// Gallery base URL, used for canonical links and the sitemap.
    #[structopt(long, env = "SNAPNOTE_BASE_URL")]
    base_url: String,

    /// Full S3-compatible region endpoint.
    #[structopt(long, env = "SNAPNOTE_S3_REGION_ENDPOINT")]
    s3_region_endpoint: String,

    /// S3-compatible bucket name holding images and their metadata.
    #[structopt(long, env = "SNAPNOTE_S3_BUCKET")]
    s3_bucket: String,

    /// S3 access key ID.
    #[structopt(long, env = "SNAPNOTE_S3_ACCESS_KEY_ID", hide_env_values = true)]
    s3_access_key_id: String,
    /// S3 secret access key.
    #[structopt(
        long,
        env = "SNAPNOTE_S3_SECRET_ACCESS_KEY",
        hide_env_values = true
    )]
    s3_secret_access_key: String,

    /// Gemini API key. When set, the secret manager is not contacted.
    #[structopt(long, env = "SNAPNOTE_GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Secret manager endpoint to fetch the Gemini API key from.
    #[structopt(
        long,
        default_value = "https://secretmanager.googleapis.com",
        env = "SNAPNOTE_SECRET_MANAGER_ENDPOINT"
    )]
    secret_manager_endpoint: String,

    /// Secret resource name, e.g. projects/<id>/secrets/GEMINI_API_KEY/versions/latest.
    #[structopt(long, env = "SNAPNOTE_GEMINI_KEY_SECRET_NAME")]
    secret_name: Option<String>,

    /// Bearer token used to access the secret manager.
    #[structopt(
        long,
        env = "SNAPNOTE_SECRET_ACCESS_TOKEN",
        hide_env_values = true
    )]
    secret_access_token: Option<String>,

    /// Gemini API endpoint.
    #[structopt(
        long,
        default_value = "https://generativelanguage.googleapis.com",
        env = "SNAPNOTE_GEMINI_ENDPOINT"
    )]
    gemini_endpoint: String,

    /// Gemini model used for captioning.
    #[structopt(long, default_value = "gemini-1.5-flash", env = "SNAPNOTE_GEMINI_MODEL")]
    gemini_model: String,

    /// Ask the model for Title:/Description: text instead of a JSON reply.
    #[structopt(long)]
    plain_captions: bool,

    /// Reject uploads whose bytes are not recognizable JPEG data.
    #[structopt(long)]
    require_jpeg: bool,

    /// What GET /files/:filename serves.
    #[structopt(
        long,
        default_value = "detail",
        possible_values = &["detail", "raw"],
        env = "SNAPNOTE_FILE_PAGE"
    )]
    file_page: FilePageMode,

    /// Path to Tera templates directory
    #[structopt(
        long,
        parse(from_os_str),
        default_value = "./templates",
        env = "SNAPNOTE_TEMPLATE_PATH"
    )]
    template_path: std::path::PathBuf,
}

pub async fn main() -> Result<(), Error> {
    dotenv::dotenv().ok();
    let args = Arc::new(Args::from_args());

    telemetry::init().map_err(Error::TelemetryInitError)?;

    let api_key = secrets::resolve_api_key(
        args.gemini_api_key.as_deref(),
        &args.secret_manager_endpoint,
        args.secret_name.as_deref(),
        args.secret_access_token.as_deref(),
    )
    .await
    .map_err(Error::SecretResolutionError)?;

    let bucket = store::open_bucket(
        &args.s3_region_endpoint,
        &args.s3_bucket,
        &args.s3_access_key_id,
        &args.s3_secret_access_key,
    )
    .map_err(Error::StoreInitError)?;

    let captioner = Arc::new(caption::Captioner::new(
        args.gemini_endpoint.clone(),
        args.gemini_model.clone(),
        api_key,
        !args.plain_captions,
    ));

    let template_path = args
        .template_path
        .canonicalize()
        .expect("could not canonicalize template path");
    let tera = match tera::Tera::new(&template_path.join("**/*.html").to_string_lossy()) {
        Ok(t) => t,
        Err(e) => {
            return Err(Error::TemplateParseError(e));
        },
    };

    let state = State {
        args: args.clone(),
        bucket,
        captioner,
        tera: Arc::new(tera),
    };
    let mut app = tide::with_state(state);

    web::mount(&mut app);

    let address: &str = args.address.as_ref();
    app.listen((address, args.port))
        .await
        .expect("starting tide app failed");

    Ok(())
}
