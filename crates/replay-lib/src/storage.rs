//! Trace artifact storage
//!
//! Traces move between the recorder and the driver through a URI: a local
//! path or `file://` URL, or a cloud bucket at `s3://`, `gs://`, or
//! `azure://`. Cloud credentials come from the environment
//! (`AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`, `GOOGLE_SERVICE_ACCOUNT`,
//! `AZURE_STORAGE_ACCOUNT_NAME`/`AZURE_STORAGE_ACCOUNT_KEY`).

use std::path::{absolute, PathBuf};

use bytes::Bytes;
use object_store::path::Path as StorePath;
use object_store::{DynObjectStore, ObjectStoreScheme, PutPayload};
use url::Url;

pub struct TraceStorage {
    scheme: ObjectStoreScheme,
    store: Box<DynObjectStore>,
    path: StorePath,
}

impl TraceStorage {
    pub fn new(uri: &str) -> anyhow::Result<TraceStorage> {
        let url = parse_uri(uri)?;
        let (scheme, path) = ObjectStoreScheme::parse(&url)?;

        let store: Box<DynObjectStore> = match scheme {
            ObjectStoreScheme::Local => Box::new(object_store::local::LocalFileSystem::new()),
            ObjectStoreScheme::Memory => Box::new(object_store::memory::InMemory::new()),
            ObjectStoreScheme::AmazonS3 => {
                Box::new(object_store::aws::AmazonS3Builder::from_env().with_url(uri).build()?)
            },
            ObjectStoreScheme::GoogleCloudStorage => {
                Box::new(object_store::gcp::GoogleCloudStorageBuilder::from_env().with_url(uri).build()?)
            },
            ObjectStoreScheme::MicrosoftAzure => {
                Box::new(object_store::azure::MicrosoftAzureBuilder::from_env().with_url(uri).build()?)
            },
            other => anyhow::bail!("unsupported trace location scheme: {other:?}"),
        };

        Ok(TraceStorage { scheme, store, path })
    }

    pub fn scheme(&self) -> &ObjectStoreScheme {
        &self.scheme
    }

    /// Whether writes should happen server-side (cloud bucket) rather than
    /// being returned to an HTTP caller.
    pub fn is_remote(&self) -> bool {
        matches!(
            self.scheme,
            ObjectStoreScheme::AmazonS3
                | ObjectStoreScheme::GoogleCloudStorage
                | ObjectStoreScheme::MicrosoftAzure
        )
    }

    pub async fn put(&self, data: Bytes) -> anyhow::Result<()> {
        self.store.put(&self.path, PutPayload::from_bytes(data)).await?;
        Ok(())
    }

    pub async fn get(&self) -> anyhow::Result<Bytes> {
        Ok(self.store.get(&self.path).await?.bytes().await?)
    }
}

fn parse_uri(uri: &str) -> anyhow::Result<Url> {
    match Url::parse(uri) {
        Ok(url) => Ok(url),
        // bare filesystem paths are allowed; they need absolutizing first
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = normalize_path(uri)?;
            Url::from_file_path(&path)
                .map_err(|_| anyhow::anyhow!("could not build file URL from path {path:?}"))
        },
        Err(err) => Err(err.into()),
    }
}

// `absolute` neither requires the path to exist nor resolves `..`, and the
// object-store path parser rejects `..`, so dot-dot segments are folded here.
fn normalize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let raw_path = absolute(PathBuf::from(raw))?;
    let mut path = PathBuf::new();

    for component in raw_path.iter() {
        if component == ".." {
            if !path.pop() {
                anyhow::bail!("path escapes the filesystem root: {raw}");
            }
        } else {
            path.push(component);
        }
    }

    Ok(path)
}
