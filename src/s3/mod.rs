use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http::Uri;
use serde::Deserialize;

pub(crate) mod logging;
use super::errors::{Error, Result};
use super::s3::logging::LoggingInterceptor;
use super::{Key, ListPage, ObjectBody, ObjectStore, Part};

#[derive(Clone, Deserialize)]
pub struct S3Config {
    secret_key: String,
    access_key: String,
    hostname: String,
    bucket_name: String,
    region: String,
}

impl S3Config {
    pub async fn new_store(&self) -> Result<S3> {
        let scp = SharedCredentialsProvider::new(
            Credentials::new(
                self.access_key.clone(),
                self.secret_key.clone(),
                None,
                None,
                "skiff",
            )
            .provide_credentials()
            .await?,
        );

        let uri = Uri::builder()
            .scheme("https")
            .authority(self.hostname.as_str())
            .path_and_query("/")
            .build()?;

        let sdk_config = aws_config::load_from_env().await;

        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .region(Region::new(self.region.clone()))
            .credentials_provider(scp)
            .endpoint_url(uri.to_string())
            .interceptor(LoggingInterceptor)
            .build();

        let s3_client = aws_sdk_s3::Client::from_conf(config);

        Ok(S3 {
            bucket_name: self.bucket_name.clone(),
            client: s3_client,
        })
    }
}

#[derive(Clone)]
pub struct S3 {
    bucket_name: String,
    client: Client,
}

#[async_trait]
impl ObjectStore for S3 {
    async fn initiate_multipart_upload(
        &self,
        key: &Key,
        content_type: Option<&str>,
    ) -> Result<String> {
        let create_multipart_upload_output = self
            .client
            .create_multipart_upload()
            .key(key.to_string())
            .set_content_type(content_type.map(String::from))
            .bucket(&self.bucket_name)
            .send()
            .await?;

        let upload_id = create_multipart_upload_output.upload_id.ok_or(
            Error::FailedToInitiateMultipartUpload("missing upload id"),
        )?;

        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        upload_id: &str,
        key: &Key,
        part_number: i32,
        body: Bytes,
    ) -> Result<Part> {
        let content_length = body.len();
        let upload_part_output = self
            .client
            .upload_part()
            .upload_id(upload_id)
            .part_number(part_number)
            .key(key.to_string())
            .body(ByteStream::from(body))
            .content_length(content_length as i64)
            .bucket(&self.bucket_name)
            .send()
            .await?;

        Ok(Part {
            e_tag: upload_part_output.e_tag,
            part_number,
        })
    }

    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        key: &Key,
        parts: &[Part],
    ) -> Result<()> {
        let mut mpu = CompletedMultipartUpload::builder();
        for part in parts {
            let mut pb = CompletedPart::builder();
            if let Some(e_tag) = &part.e_tag {
                pb = pb.e_tag(e_tag);
            }
            mpu = mpu.parts(pb.part_number(part.part_number).build());
        }
        let _complete_multipart_upload_output = self
            .client
            .complete_multipart_upload()
            .multipart_upload(mpu.build())
            .upload_id(upload_id)
            .key(key.to_string())
            .bucket(&self.bucket_name)
            .send()
            .await?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, upload_id: &str, key: &Key) -> Result<()> {
        let _abort_multipart_upload_output = self
            .client
            .abort_multipart_upload()
            .upload_id(upload_id)
            .key(key.to_string())
            .bucket(&self.bucket_name)
            .send()
            .await?;
        // TODO: follow the abort with ListParts to catch parts that raced it, as the SDK docs
        // suggest.

        Ok(())
    }

    async fn get(&self, key: &Key) -> Result<ObjectBody> {
        let get_object_output = self
            .client
            .get_object()
            .key(key.to_string())
            .bucket(&self.bucket_name)
            .send()
            .await?;

        Ok(get_object_output.body.map_err(Error::from).boxed())
    }

    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage> {
        let list_objects_output = self
            .client
            .list_objects_v2()
            .prefix(prefix)
            .set_continuation_token(continuation)
            .bucket(&self.bucket_name)
            .send()
            .await?;

        let keys = list_objects_output
            .contents
            .unwrap_or_default()
            .into_iter()
            .map(|object| object.key.ok_or(Error::ListedObjectMissingKey))
            .collect::<Result<Vec<String>>>()?;

        Ok(ListPage {
            keys,
            continuation: list_objects_output.next_continuation_token,
        })
    }
}
