use activerecord::{Error, Result, SqlValue, Values};
use tests_common::libsql_factory;

#[tokio::test(flavor = "multi_thread")]
async fn fetch_helpers_over_libsql() -> Result<()> {
    let dao = libsql_factory().await?.dao();

    let pairs = dao
        .fetch_pairs("SELECT id, username FROM users ORDER BY id", vec![])
        .await?;
    assert_eq!(pairs.len(), 5);
    assert_eq!(pairs[0], (SqlValue::Integer(1), SqlValue::from("Foo")));

    let email = dao
        .fetch_single_value(
            "SELECT email FROM users WHERE username = ?",
            vec!["Foo".into()],
        )
        .await?;
    assert_eq!(email, SqlValue::from("foo@bar.com"));

    let missing = dao
        .fetch_single_value("SELECT email FROM users WHERE id = ?", vec![99.into()])
        .await?;
    assert!(missing.is_null());

    let ids = dao
        .fetch_col("SELECT id FROM users WHERE active = 1 ORDER BY id", vec![])
        .await?;
    assert_eq!(ids.len(), 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn describe_and_list_tables() -> Result<()> {
    let dao = libsql_factory().await?.dao();
    let tables = dao.list_tables().await?;
    assert_eq!(tables, ["documents", "user_documents", "users"]);

    let columns = dao.describe_table("users").await?;
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        ["id", "username", "email", "active", "created", "updated"]
    );
    assert!(columns[0].primary_key);
    assert!(columns[1].is_required());

    let err = dao.describe_table("nope").await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn transactional_rolls_back_on_error() -> Result<()> {
    let dao = libsql_factory().await?.dao();
    let mut values = Values::new();
    values.insert("username".into(), "Temp".into());

    let err = dao
        .transactional(|| async {
            dao.insert_row("users", &values).await?;
            Err::<(), _>(Error::Create("abort".into()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Create(_)));
    let count = dao
        .fetch_single_value("SELECT COUNT(*) FROM users", vec![])
        .await?;
    assert_eq!(count, SqlValue::Integer(5));

    dao.transactional(|| async {
        dao.insert_row("users", &values).await?;
        // Inner scope runs as a savepoint and is undone on its own.
        let _ = dao
            .transactional(|| async {
                dao.insert_row("users", &values).await?;
                Err::<(), _>(Error::Create("inner".into()))
            })
            .await;
        Ok::<_, Error>(())
    })
    .await?;
    let count = dao
        .fetch_single_value("SELECT COUNT(*) FROM users WHERE username = 'Temp'", vec![])
        .await?;
    assert_eq!(count, SqlValue::Integer(1));
    assert!(!dao.db().is_transaction_active());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn write_helpers_affect_rows() -> Result<()> {
    let dao = libsql_factory().await?.dao();
    let mut values = Values::new();
    values.insert("active".into(), 0.into());
    let mut filter = Values::new();
    filter.insert("username".into(), "Bar".into());

    assert_eq!(dao.update_rows("users", &values, &filter).await?, 1);
    assert_eq!(dao.delete_rows("users", &filter).await?, 1);
    assert_eq!(dao.delete_rows("users", &filter).await?, 0);
    Ok(())
}
