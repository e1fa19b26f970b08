use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use tunerguy_hub::db;
use tunerguy_hub::hub;
use tunerguy_hub::model::{NewPost, PageKind, PostEdit};
use tunerguy_hub::tracker::{self, TrackerError};
use tunerguy_hub::validators::ValidationError;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Tree {
    hub: i64,
    brakes: i64,
    engine: i64,
    wheels: i64,
}

async fn seed_tree(pool: &sqlx::SqlitePool) -> Tree {
    let home = db::create_page(pool, None, PageKind::Home, "Home").await.unwrap();
    let hub = db::create_page(pool, Some(home), PageKind::Hub, "Fiesta ST").await.unwrap();
    let brakes = db::create_page(pool, Some(hub), PageKind::Category, "Brakes").await.unwrap();
    let engine = db::create_page(pool, Some(hub), PageKind::Category, "Engine").await.unwrap();
    let wheels = db::create_page(pool, Some(hub), PageKind::Category, "Wheels").await.unwrap();
    Tree {
        hub,
        brakes,
        engine,
        wheels,
    }
}

async fn publish(pool: &sqlx::SqlitePool, parent_id: i64, title: &str, date: NaiveDate) -> i64 {
    tracker::record_post(
        pool,
        NewPost {
            parent_id,
            title: title.into(),
            snippet: format!("{title} excerpt"),
            date: Some(date),
        },
    )
    .await
    .unwrap()
    .id
}

#[tokio::test]
async fn post_category_is_structural_parent() {
    let pool = setup_pool().await;
    let tree = seed_tree(&pool).await;

    let id = publish(&pool, tree.brakes, "Pad swap", day(2024, 1, 10)).await;
    let post = db::get_post(&pool, id).await.unwrap().unwrap();
    assert_eq!(post.category_id, tree.brakes);
    assert_eq!(post.slug, "pad-swap");

    let parent = db::get_parent(&pool, id).await.unwrap().unwrap();
    assert_eq!(parent.id, post.category_id);

    let brakes = db::get_category(&pool, tree.brakes).await.unwrap().unwrap();
    assert_eq!(brakes.date_of_last_post, Some(day(2024, 1, 10)));
}

#[tokio::test]
async fn backdated_post_does_not_take_latest() {
    let pool = setup_pool().await;
    let tree = seed_tree(&pool).await;

    publish(&pool, tree.brakes, "Rotors", day(2024, 1, 10)).await;
    publish(&pool, tree.engine, "Old dyno run", day(2024, 1, 5)).await;

    let latest = tracker::latest_category(&pool, tree.hub).await.unwrap().unwrap();
    assert_eq!(latest.id(), tree.brakes);

    let engine = db::get_category(&pool, tree.engine).await.unwrap().unwrap();
    assert_eq!(engine.date_of_last_post, Some(day(2024, 1, 5)));

    publish(&pool, tree.engine, "Turbo upgrade", day(2024, 1, 12)).await;
    let latest = tracker::latest_category(&pool, tree.hub).await.unwrap().unwrap();
    assert_eq!(latest.id(), tree.engine);
}

#[tokio::test]
async fn backdated_post_keeps_category_on_top() {
    let pool = setup_pool().await;
    let tree = seed_tree(&pool).await;

    publish(&pool, tree.brakes, "Rotors", day(2024, 1, 10)).await;
    publish(&pool, tree.engine, "Intake", day(2024, 1, 8)).await;
    publish(&pool, tree.brakes, "Archive: old pads", day(2023, 6, 1)).await;

    let brakes = db::get_category(&pool, tree.brakes).await.unwrap().unwrap();
    assert_eq!(brakes.date_of_last_post, Some(day(2024, 1, 10)));

    let overview = hub::hub_overview(&pool, tree.hub).await.unwrap();
    assert_eq!(overview.latest_category_id, Some(tree.brakes));

    // The hub's latest category holds the newest post shown on any category page.
    let brakes_page = hub::category_overview(&pool, tree.brakes).await.unwrap();
    let engine_page = hub::category_overview(&pool, tree.engine).await.unwrap();
    assert!(brakes_page.latest_post.unwrap().date > engine_page.latest_post.unwrap().date);
}

#[tokio::test]
async fn equal_dates_go_to_most_recent_save() {
    let pool = setup_pool().await;
    let tree = seed_tree(&pool).await;

    publish(&pool, tree.engine, "Intake", day(2024, 3, 1)).await;
    publish(&pool, tree.wheels, "Tyres", day(2024, 3, 1)).await;
    let latest = tracker::latest_sibling(&pool, tree.engine).await.unwrap().unwrap();
    assert_eq!(latest.id(), tree.wheels);

    publish(&pool, tree.engine, "Exhaust", day(2024, 3, 1)).await;
    let latest = tracker::latest_sibling(&pool, tree.wheels).await.unwrap().unwrap();
    assert_eq!(latest.id(), tree.engine);
}

#[tokio::test]
async fn exactly_one_latest_after_any_sequence() {
    let pool = setup_pool().await;
    let tree = seed_tree(&pool).await;
    let cats = [tree.brakes, tree.engine, tree.wheels];

    let saves = [
        (0, day(2024, 2, 1)),
        (1, day(2024, 1, 20)),
        (2, day(2024, 2, 3)),
        (1, day(2024, 2, 3)),
        (0, day(2023, 12, 31)),
        (2, day(2024, 1, 1)),
    ];
    for (i, (cat, date)) in saves.iter().enumerate() {
        publish(&pool, cats[*cat], &format!("post {i}"), *date).await;

        let siblings = db::sibling_categories(&pool, tree.brakes).await.unwrap();
        let max_date = siblings.iter().filter_map(|c| c.date_of_last_post).max();
        let holders: Vec<i64> = siblings
            .iter()
            .filter(|c| c.date_of_last_post == max_date)
            .map(|c| c.id())
            .collect();

        let latest = tracker::latest_sibling(&pool, tree.brakes).await.unwrap().unwrap();
        assert_eq!(latest.date_of_last_post, max_date);
        assert!(holders.contains(&latest.id()));
        // The query ordering agrees with the in-memory rule.
        assert_eq!(siblings[0].id(), latest.id());
    }

    // Newest posts: brakes 2024-02-01, engine 2024-02-03, wheels 2024-02-03.
    // Wheels was saved last, so it wins the tie.
    let latest = tracker::latest_category(&pool, tree.hub).await.unwrap().unwrap();
    assert_eq!(latest.id(), tree.wheels);
    let brakes = db::get_category(&pool, tree.brakes).await.unwrap().unwrap();
    assert_eq!(brakes.date_of_last_post, Some(day(2024, 2, 1)));
}

#[tokio::test]
async fn posts_need_a_category_parent() {
    let pool = setup_pool().await;
    let tree = seed_tree(&pool).await;

    let err = tracker::record_post(
        &pool,
        NewPost {
            parent_id: tree.hub,
            title: "Misplaced".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        TrackerError::ParentNotCategory { page_id, kind: PageKind::Hub } if page_id == tree.hub
    ));

    let err = tracker::record_post(
        &pool,
        NewPost {
            parent_id: 9999,
            title: "Nowhere".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TrackerError::PageNotFound(9999)));

    let pages = db::descendants_of(&pool, tree.hub).await.unwrap();
    assert!(pages.iter().all(|p| p.kind != PageKind::Post));
}

#[tokio::test]
async fn invalid_post_writes_nothing() {
    let pool = setup_pool().await;
    let tree = seed_tree(&pool).await;

    let err = tracker::record_post(
        &pool,
        NewPost {
            parent_id: tree.brakes,
            title: "Long excerpt".into(),
            snippet: "x".repeat(201),
            date: Some(day(2024, 1, 1)),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Validation(ValidationError::PostSnippetTooLong)
    ));

    let brakes = db::get_category(&pool, tree.brakes).await.unwrap().unwrap();
    assert_eq!(brakes.date_of_last_post, None);
    assert!(db::posts_in_category(&pool, tree.brakes, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn date_defaults_to_today() {
    let pool = setup_pool().await;
    let tree = seed_tree(&pool).await;

    let before = Utc::now().date_naive();
    let post = tracker::record_post(
        &pool,
        NewPost {
            parent_id: tree.wheels,
            title: "Fresh".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let after = Utc::now().date_naive();
    assert!(post.date == before || post.date == after);

    let wheels = db::get_category(&pool, tree.wheels).await.unwrap().unwrap();
    assert_eq!(wheels.date_of_last_post, Some(post.date));
}

#[tokio::test]
async fn resaving_a_post_restamps_its_category() {
    let pool = setup_pool().await;
    let tree = seed_tree(&pool).await;

    let rotors = publish(&pool, tree.brakes, "Rotors", day(2024, 1, 10)).await;
    publish(&pool, tree.engine, "Intake", day(2024, 1, 8)).await;
    assert_eq!(
        tracker::latest_category(&pool, tree.hub).await.unwrap().unwrap().id(),
        tree.brakes
    );

    let edited = tracker::update_post(
        &pool,
        rotors,
        PostEdit {
            title: Some("Rotors, revisited".into()),
            date: Some(day(2024, 1, 2)),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(edited.category_id, tree.brakes);
    assert_eq!(edited.slug, "rotors-revisited");
    assert_eq!(edited.date, day(2024, 1, 2));

    // The only brakes post moved back, so the marker follows it down.
    let brakes = db::get_category(&pool, tree.brakes).await.unwrap().unwrap();
    assert_eq!(brakes.date_of_last_post, Some(day(2024, 1, 2)));
    assert_eq!(
        tracker::latest_category(&pool, tree.hub).await.unwrap().unwrap().id(),
        tree.engine
    );

    let stored = db::get_post(&pool, rotors).await.unwrap().unwrap();
    assert_eq!(stored, edited);

    let pads = publish(&pool, tree.brakes, "Pads", day(2024, 1, 20)).await;
    tracker::update_post(
        &pool,
        rotors,
        PostEdit {
            date: Some(day(2023, 11, 1)),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let brakes = db::get_category(&pool, tree.brakes).await.unwrap().unwrap();
    assert_eq!(brakes.date_of_last_post, Some(day(2024, 1, 20)));
    assert_eq!(
        tracker::latest_category(&pool, tree.hub).await.unwrap().unwrap().id(),
        tree.brakes
    );
    assert!(db::get_post(&pool, pads).await.unwrap().is_some());

    assert!(matches!(
        tracker::update_post(&pool, 4242, PostEdit::default()).await,
        Err(TrackerError::PostNotFound(4242))
    ));
}

#[tokio::test]
async fn hub_and_category_overviews() {
    let pool = setup_pool().await;
    let tree = seed_tree(&pool).await;

    for (i, d) in [3, 9, 1, 7].iter().enumerate() {
        publish(&pool, tree.engine, &format!("engine {i}"), day(2024, 5, *d)).await;
    }
    publish(&pool, tree.brakes, "brakes 0", day(2024, 4, 30)).await;

    let overview = hub::hub_overview(&pool, tree.hub).await.unwrap();
    assert_eq!(overview.latest_category_id, Some(tree.engine));
    let order: Vec<i64> = overview.categories.iter().map(|c| c.category.id()).collect();
    // engine's newest post is 2024-05-09, brakes 2024-04-30, wheels has no posts.
    assert_eq!(order, vec![tree.engine, tree.brakes, tree.wheels]);

    let engine_card = &overview.categories[0];
    let dates: Vec<NaiveDate> = engine_card.posts.iter().map(|p| p.date).collect();
    assert_eq!(dates, vec![day(2024, 5, 9), day(2024, 5, 7), day(2024, 5, 3)]);
    assert!(overview.categories[2].posts.is_empty());
    assert!(overview.reddit_embeds.is_empty());

    let category = hub::category_overview(&pool, tree.engine).await.unwrap();
    assert_eq!(category.latest_post.unwrap().date, day(2024, 5, 9));
    assert_eq!(category.posts.len(), 3);

    let empty = hub::category_overview(&pool, tree.wheels).await.unwrap();
    assert!(empty.latest_post.is_none());
    assert!(empty.posts.is_empty());

    assert!(hub::category_overview(&pool, tree.hub).await.is_err());
    assert!(hub::hub_overview(&pool, tree.engine).await.is_err());
}
