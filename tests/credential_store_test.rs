use blastwarp_api::{
    db::credential_store::{CredentialStore, CredentialStoreError, FsCredentialStore},
    wa::{Credentials, MeInfo},
};

#[tokio::test]
async fn fs_store_round_trips_and_wipes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = FsCredentialStore::new(dir.path());

    assert!(store.load("u1").await?.is_none());
    assert!(!store.exists("u1").await?);

    let credentials = Credentials {
        me: Some(MeInfo {
            jid: "5511912345678@s.whatsapp.net".to_owned(),
            push_name: Some("Ana".to_owned()),
        }),
        ..Credentials::generate()
    };
    store.save("u1", &credentials).await?;

    assert!(store.exists("u1").await?);
    assert_eq!(store.load("u1").await?, Some(credentials));
    assert!(!store.session_dir("u1").join("creds.json.tmp").exists());

    store.wipe("u1").await?;
    assert!(!store.session_dir("u1").exists());
    assert!(store.load("u1").await?.is_none());

    store.wipe("u1").await?;
    Ok(())
}

#[tokio::test]
async fn fs_store_reports_corrupt_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = FsCredentialStore::new(dir.path());
    let session_dir = store.session_dir("u2");
    std::fs::create_dir_all(&session_dir)?;
    std::fs::write(session_dir.join("creds.json"), b"{not json")?;

    let error = store.load("u2").await.expect_err("corrupt file should fail");
    assert!(matches!(error, CredentialStoreError::Corrupt { ref user_id, .. } if user_id == "u2"));
    Ok(())
}

#[tokio::test]
async fn user_ids_cannot_escape_the_root() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = FsCredentialStore::new(dir.path());

    for user_id in ["../outside", "..", "a/b"] {
        let session_dir = store.session_dir(user_id);
        assert_eq!(session_dir.parent(), Some(dir.path()), "{user_id} escaped");
    }

    store.save("../outside", &Credentials::generate()).await?;
    assert!(!dir.path().parent().map(|p| p.join("outside").exists()).unwrap_or(false));
    Ok(())
}

#[tokio::test]
async fn distinct_user_ids_get_distinct_directories() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = FsCredentialStore::new(dir.path());

    assert_ne!(store.session_dir("a/b"), store.session_dir("a_b"));
    assert_ne!(store.session_dir("a b"), store.session_dir("a:b"));
    assert_ne!(store.session_dir("a%2Fb"), store.session_dir("a/b"));

    store.save("a/b", &Credentials::generate()).await?;
    store.save("a_b", &Credentials::generate()).await?;
    store.wipe("a_b").await?;

    assert!(store.exists("a/b").await?);
    assert!(!store.exists("a_b").await?);
    Ok(())
}
