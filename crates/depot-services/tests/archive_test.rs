mod helpers;

use std::io::Read;

use depot_core::AppError;
use depot_services::ArchiveRequest;
use helpers::*;

#[tokio::test]
async fn test_archive_denied_when_any_file_is_not_viewable() {
    let t = setup().await;
    let mine = seed_file(&t, "u1", "mine.txt", b"mine", None, None).await;
    let theirs = seed_file(&t, "u2", "theirs.txt", b"theirs", None, None).await;

    let err = t
        .depot
        .archives
        .create_archive(
            &owner(),
            ArchiveRequest {
                file_ids: vec![mine.id, theirs.id],
                name: Some("bundle".to_string()),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Authorization(_)));
    assert!(t.archive_entries().is_empty());
}

#[tokio::test]
async fn test_archive_contains_every_file() {
    let t = setup().await;
    let a = seed_file(&t, "u1", "notes.txt", b"first", None, None).await;
    let b = seed_file(&t, "u1", "notes.txt", b"second", None, None).await;
    let c = seed_file(&t, "u2", "shared.txt", b"public", None, None).await;
    let mut shared = c.clone();
    shared.is_public = true;
    t.repo.put(shared).unwrap();

    let result = t
        .depot
        .archives
        .create_archive(
            &owner(),
            ArchiveRequest {
                file_ids: vec![a.id, b.id, c.id, a.id],
                name: Some("bundle".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(result.file_count, 3);
    assert!(result.path.starts_with(&t.depot.config.archive_dir));
    assert_eq!(result.path.extension().and_then(|e| e.to_str()), Some("zip"));
    assert_eq!(result.size, std::fs::metadata(&result.path).unwrap().len());
    assert!(!t.archive_entries().iter().any(|e| e.ends_with(".partial")));

    let file = std::fs::File::open(&result.path).unwrap();
    let mut zip = zip::ZipArchive::new(file).unwrap();
    assert_eq!(zip.len(), 3);

    let mut contents = String::new();
    zip.by_name("notes.txt")
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "first");

    contents.clear();
    zip.by_name("notes (1).txt")
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "second");

    assert!(zip.by_name("shared.txt").is_ok());

    // The archive directory is not an upload folder.
    let folders = t.depot.storage.list_folders().await.unwrap();
    assert!(!folders.iter().any(|f| f == "archives"));
}

#[tokio::test]
async fn test_archive_io_failure_leaves_no_artifact() {
    let t = setup().await;
    let a = seed_file(&t, "u1", "a.txt", b"a", None, None).await;
    let b = seed_file(&t, "u1", "b.txt", b"b", None, None).await;
    std::fs::remove_file(t.root().join(&b.storage_path)).unwrap();

    let err = t
        .depot
        .archives
        .create_archive(
            &owner(),
            ArchiveRequest {
                file_ids: vec![a.id, b.id],
                name: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Compression(_)));
    assert!(t.archive_entries().is_empty());
}

#[tokio::test]
async fn test_archive_requires_known_ids() {
    let t = setup().await;

    let err = t
        .depot
        .archives
        .create_archive(&owner(), ArchiveRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = t
        .depot
        .archives
        .create_archive(
            &owner(),
            ArchiveRequest {
                file_ids: vec![missing_id()],
                name: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
