mod common;

use common::mock_portal::MockServer;
use tokio::sync::watch;
use tv_core::catalog::{
    CatalogSource, CatalogStore, FetchOptions, LoadCause, FIRST_ORGANIC_INDEX, PROGRESS_IDLE,
    PROGRESS_PARSED,
};
use tv_core::channel::ChannelKey;
use tv_core::navigation::{Layout, Navigation};
use tv_core::overlay::Overlay;
use tv_core::prefs::PreferenceStore;

fn store(dir: &tempfile::TempDir) -> CatalogStore {
    CatalogStore::new(
        Overlay::open(dir.path().join("overlay.toml")),
        PreferenceStore::open(dir.path().join("prefs.json")),
    )
}

#[tokio::test]
async fn remote_import_reports_progress_and_builds_catalog() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut store = store(&dir);
    let (progress_tx, progress_rx) = watch::channel(PROGRESS_IDLE);

    let source = CatalogSource::parse(&server.url("/lists/channels.json"));
    let catalog = store
        .load(&source, &FetchOptions::default(), Some(&progress_tx))
        .await
        .unwrap();

    assert_eq!(*progress_rx.borrow(), PROGRESS_PARSED);
    assert_eq!(catalog.len(), 3);
    let names: Vec<&str> = catalog.categories().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Favorites", "All", "News", "Sports"]);
    for (id, channel) in catalog.channels().iter().enumerate() {
        assert_eq!(channel.id, id);
    }
    assert_eq!(store.skipped(), 1);
    assert_eq!(store.location(), Some(server.url("/lists/channels.json").as_str()));
}

#[tokio::test]
async fn failed_import_keeps_previous_catalog() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut store = store(&dir);
    let (progress_tx, progress_rx) = watch::channel(PROGRESS_IDLE);

    let good = CatalogSource::parse(&server.url("/lists/channels.json"));
    store.load(&good, &FetchOptions::default(), None).await.unwrap();

    let forbidden = CatalogSource::parse(&server.url("/lists/forbidden.json"));
    let err = store
        .load(&forbidden, &FetchOptions::default(), Some(&progress_tx))
        .await
        .unwrap_err();
    assert!(matches!(err.cause, LoadCause::Status(403)));
    assert_eq!(*progress_rx.borrow(), PROGRESS_IDLE);

    let broken = CatalogSource::parse(&server.url("/lists/broken.json"));
    let err = store
        .load(&broken, &FetchOptions::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err.cause, LoadCause::Malformed(_)));

    assert_eq!(store.catalog().len(), 3);
    assert_eq!(store.location(), Some(good.describe().as_str()));
}

#[tokio::test]
async fn overlay_edits_survive_restart_and_reimport() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let source = CatalogSource::parse(&server.url("/lists/channels.json"));
    let beta = ChannelKey::from("http://cdn.example/beta.m3u8");

    {
        let mut store = store(&dir);
        store.load(&source, &FetchOptions::default(), None).await.unwrap();
        store.rename("News", "Top News").unwrap();
        store
            .reorder_categories(vec!["Sports".into(), "News".into()])
            .unwrap();
        store
            .reorder_channels("News", vec![beta.clone()])
            .unwrap();
        let beta_id = store.catalog().find_by_key(&beta).unwrap().id;
        assert!(store.toggle_like(beta_id).unwrap());
    }

    let mut store = store(&dir);
    let catalog = store
        .load(&source, &FetchOptions::default(), None)
        .await
        .unwrap();

    let names: Vec<&str> = catalog.categories().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Favorites", "All", "Sports", "Top News"]);
    let news = &catalog.categories()[FIRST_ORGANIC_INDEX + 1];
    assert_eq!(news.original_name, "News");
    let titles: Vec<&str> = news.channels.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Beta News", "Alpha News"]);

    let favorites = &catalog.categories()[0];
    assert_eq!(favorites.channels.len(), 1);
    assert_eq!(favorites.channels[0].key, beta);
    assert!(favorites.channels[0].is_liked());
}

#[tokio::test]
async fn navigation_follows_a_rebuilt_catalog() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut store = store(&dir);
    let source = CatalogSource::parse(&server.url("/lists/channels.json"));
    store.load(&source, &FetchOptions::default(), None).await.unwrap();

    let mut nav = Navigation::new(false);
    nav.rebase(Layout::from_catalog(store.catalog()), Some(FIRST_ORGANIC_INDEX), None);
    let alpha = store.catalog().channel(nav.channel().unwrap()).unwrap().key.clone();
    assert_eq!(alpha.as_str(), "http://cdn.example/alpha.m3u8");

    // Removing the tuned channel re-clamps to the first remaining member.
    store.remove_channel(&alpha).unwrap();
    let hint = store.catalog().find_by_key(&alpha).map(|c| c.id);
    assert_eq!(hint, None);
    nav.rebase(Layout::from_catalog(store.catalog()), None, hint);

    let tuned = store.catalog().channel(nav.channel().unwrap()).unwrap();
    assert_eq!(tuned.title, "Beta News");
    assert!(store.catalog().categories()[nav.category()].contains(tuned.id));

    // Three channels minus one: two steps forward return to the start.
    let start = nav.channel();
    nav.next();
    nav.next();
    assert_eq!(nav.channel(), start);
}
