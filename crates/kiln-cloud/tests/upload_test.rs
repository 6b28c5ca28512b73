use kiln_cloud::backend::UploadBackend;
use kiln_cloud::upload::{UploadClient, UploadError};
use mockall::mock;
use mockall::predicate::eq;

mock! {
    Backend {}

    impl UploadBackend for Backend {
        async fn create_upload_url(&self, digest: Option<String>) -> Result<String, UploadError>;
        async fn put(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<u16, UploadError>;
    }
}

const SIGNED: &str = "https://uploads.example.com/ctx/abc.tar.gz?X-Amz-Signature=deadbeef";

#[tokio::test]
async fn upload_returns_url_without_query() {
    let mut mock = MockBackend::new();
    mock.expect_create_upload_url()
        .with(eq(Some("sha256-abc=".to_owned())))
        .times(1)
        .returning(|_| Ok(SIGNED.to_owned()));
    mock.expect_put()
        .withf(|url, content_type, body| {
            url == SIGNED && content_type == "application/gzip" && body.as_slice() == b"archive"
        })
        .times(1)
        .returning(|_, _, _| Ok(200));

    let client = UploadClient::with_backend(mock);
    let url = client
        .upload(b"archive".to_vec(), Some("sha256-abc="))
        .await
        .unwrap();

    assert_eq!(url, "https://uploads.example.com/ctx/abc.tar.gz");
}

#[tokio::test]
async fn forced_upload_sends_no_digest() {
    let mut mock = MockBackend::new();
    mock.expect_create_upload_url()
        .with(eq(None))
        .times(1)
        .returning(|_| Ok("https://uploads.example.com/ctx/fresh".to_owned()));
    mock.expect_put().returning(|_, _, _| Ok(200));

    let client = UploadClient::with_backend(mock);
    let url = client.upload(vec![1, 2, 3], None).await.unwrap();
    assert_eq!(url, "https://uploads.example.com/ctx/fresh");
}

#[tokio::test]
async fn non_200_put_is_an_error() {
    let mut mock = MockBackend::new();
    mock.expect_create_upload_url()
        .returning(|_| Ok(SIGNED.to_owned()));
    mock.expect_put().returning(|_, _, _| Ok(403));

    let client = UploadClient::with_backend(mock);
    let err = client.upload(vec![0], Some("sha256-x")).await.unwrap_err();

    assert!(matches!(err, UploadError::Status { status: 403 }));
    assert!(err.to_string().contains("403"));
}

#[tokio::test]
async fn created_is_not_ok() {
    let mut mock = MockBackend::new();
    mock.expect_create_upload_url()
        .returning(|_| Ok(SIGNED.to_owned()));
    mock.expect_put().returning(|_, _, _| Ok(201));

    let client = UploadClient::with_backend(mock);
    assert!(matches!(
        client.upload(vec![0], None).await,
        Err(UploadError::Status { status: 201 })
    ));
}

#[tokio::test]
async fn control_plane_failure_skips_put() {
    let mut mock = MockBackend::new();
    mock.expect_create_upload_url().returning(|_| {
        Err(UploadError::ControlPlane {
            detail: "401 Unauthorized".to_owned(),
        })
    });
    mock.expect_put().never();

    let client = UploadClient::with_backend(mock);
    let err = client.upload(vec![0], Some("sha256-x")).await.unwrap_err();
    assert!(matches!(err, UploadError::ControlPlane { .. }));
}

#[tokio::test]
async fn malformed_upload_url_is_reported() {
    let mut mock = MockBackend::new();
    mock.expect_create_upload_url()
        .returning(|_| Ok("::not-a-url::".to_owned()));
    mock.expect_put().returning(|_, _, _| Ok(200));

    let client = UploadClient::with_backend(mock);
    assert!(matches!(
        client.upload(vec![0], None).await,
        Err(UploadError::InvalidUrl { .. })
    ));
}
