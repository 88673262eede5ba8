//! Runs querysets against a real in-memory SQLite database.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use relq_core::{ErrorKind, RelqError};
use relq_db::query::DateKind;
use relq_db::{
    DbExecutor, FieldDef, FieldType, ModelMeta, ModelRegistry, OrderDirection, QuerySet, Value, Q,
};
use relq_db_backends::SqliteBackend;

const SCHEMA: &str = r#"
CREATE TABLE "many_to_one_reporter" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "first_name" TEXT NOT NULL,
    "last_name" TEXT NOT NULL
);
CREATE TABLE "many_to_one_article" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "headline" TEXT NOT NULL,
    "pub_date" DATE NOT NULL,
    "reporter_id" INTEGER NOT NULL REFERENCES "many_to_one_reporter" ("id")
);
CREATE TABLE "queries_tag" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "name" TEXT NOT NULL,
    "parent_id" INTEGER NULL REFERENCES "queries_tag" ("id")
);
CREATE TABLE "queries_item" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "name" TEXT NOT NULL
);
CREATE TABLE "queries_item_tags" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "item_id" INTEGER NOT NULL REFERENCES "queries_item" ("id"),
    "tag_id" INTEGER NOT NULL REFERENCES "queries_tag" ("id")
);
CREATE TABLE "inherit_place" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "name" TEXT NOT NULL,
    "address" TEXT NOT NULL
);
CREATE TABLE "inherit_restaurant" (
    "place_ptr_id" INTEGER PRIMARY KEY REFERENCES "inherit_place" ("id"),
    "serves_pizza" BOOLEAN NOT NULL
);
"#;

const DATA: &str = r#"
INSERT INTO "many_to_one_reporter" ("id", "first_name", "last_name") VALUES
    (1, 'John', 'Smith'),
    (2, 'Paul', 'Jones');
INSERT INTO "many_to_one_article" ("id", "headline", "pub_date", "reporter_id") VALUES
    (1, 'This is a test', '2005-07-27', 1),
    (2, 'John''s second story', '2005-07-29', 1),
    (3, 'Paul''s story', '2006-01-17', 2),
    (4, 'This is a test too', '2007-03-01', 2);
INSERT INTO "queries_tag" ("id", "name", "parent_id") VALUES
    (1, 't1', NULL),
    (2, 't2', 1),
    (3, 't3', 1),
    (4, 't4', 3);
INSERT INTO "queries_item" ("id", "name") VALUES
    (1, 'one'),
    (2, 'two'),
    (3, 'three');
INSERT INTO "queries_item_tags" ("item_id", "tag_id") VALUES
    (1, 1), (1, 2),
    (2, 1), (2, 4),
    (3, 3);
"#;

fn registry() -> Arc<ModelRegistry> {
    ModelRegistry::new()
        .with_model(
            ModelMeta::new("many_to_one", "Reporter")
                .field(FieldDef::auto("id"))
                .field(FieldDef::new("first_name", FieldType::CharField).max_length(30))
                .field(FieldDef::new("last_name", FieldType::CharField).max_length(30)),
        )
        .unwrap()
        .with_model(
            ModelMeta::new("many_to_one", "Article")
                .field(FieldDef::auto("id"))
                .field(FieldDef::new("headline", FieldType::CharField).max_length(100))
                .field(FieldDef::new("pub_date", FieldType::DateField))
                .field(FieldDef::foreign_key("reporter", "Reporter"))
                .ordering(["headline"]),
        )
        .unwrap()
        .with_model(
            ModelMeta::new("queries", "Tag")
                .field(FieldDef::auto("id"))
                .field(FieldDef::new("name", FieldType::CharField).max_length(10))
                .field(
                    FieldDef::foreign_key("parent", "self")
                        .nullable()
                        .related_name("children"),
                )
                .ordering(["name"]),
        )
        .unwrap()
        .with_model(
            ModelMeta::new("queries", "Item")
                .field(FieldDef::auto("id"))
                .field(FieldDef::new("name", FieldType::CharField).max_length(10))
                .field(FieldDef::many_to_many("tags", "Tag"))
                .ordering(["name"]),
        )
        .unwrap()
        .with_model(
            ModelMeta::new("inherit", "Place")
                .field(FieldDef::auto("id"))
                .field(FieldDef::new("name", FieldType::CharField).max_length(50))
                .field(FieldDef::new("address", FieldType::CharField).max_length(80)),
        )
        .unwrap()
        .with_model(
            ModelMeta::new("inherit", "Restaurant")
                .field(FieldDef::parent_link("place_ptr", "Place"))
                .field(FieldDef::new("serves_pizza", FieldType::BooleanField)),
        )
        .unwrap()
        .into_shared()
        .unwrap()
}

fn setup() -> (Arc<ModelRegistry>, SqliteBackend) {
    relq_core::logging::try_setup_test_logging();
    let db = SqliteBackend::memory().unwrap();
    db.execute_batch(SCHEMA).unwrap();
    db.execute_batch(DATA).unwrap();
    (registry(), db)
}

fn qs(registry: &Arc<ModelRegistry>, model: &str) -> QuerySet {
    QuerySet::new(Arc::clone(registry), model).unwrap()
}

fn strings(qs: &QuerySet, column: &str, db: &dyn DbExecutor) -> Vec<String> {
    qs.fetch(db)
        .unwrap()
        .iter()
        .map(|row| row.get::<String>(column).unwrap())
        .collect()
}

#[test]
fn test_filter_across_foreign_key_returns_matching_rows() {
    let (registry, db) = setup();
    let articles = qs(&registry, "Article")
        .filter(Q::filter("reporter__first_name", "John"))
        .unwrap();
    assert_eq!(
        strings(&articles, "headline", &db),
        vec!["John's second story", "This is a test"]
    );
}

#[test]
fn test_underscore_column_name_is_not_a_field() {
    let (registry, _db) = setup();
    let err = qs(&registry, "Article")
        .filter(Q::filter("reporter_id__exact", 1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);
}

#[test]
fn test_reverse_relation_lookup() {
    let (registry, db) = setup();
    let reporters = qs(&registry, "Reporter")
        .filter(Q::filter("article__headline__startswith", "This"))
        .unwrap()
        .distinct(true);
    let mut names = strings(&reporters, "first_name", &db);
    names.sort();
    assert_eq!(names, vec!["John", "Paul"]);
}

#[test]
fn test_exclude_across_m2m_drops_whole_item() {
    let (registry, db) = setup();
    let items = qs(&registry, "Item")
        .exclude(Q::filter("tags__name", "t4"))
        .unwrap();
    assert_eq!(strings(&items, "name", &db), vec!["one", "three"]);
}

#[test]
fn test_chained_m2m_filters_need_both_tags() {
    let (registry, db) = setup();
    let items = qs(&registry, "Item")
        .filter(Q::filter("tags__name", "t1"))
        .unwrap()
        .filter(Q::filter("tags__name", "t2"))
        .unwrap();
    assert_eq!(strings(&items, "name", &db), vec!["one"]);

    let single = qs(&registry, "Item")
        .filter(Q::filter("tags__name", "t1") & Q::filter("tags__name", "t2"))
        .unwrap();
    assert!(single.fetch(&db).unwrap().is_empty());
}

#[test]
fn test_or_across_reverse_relation_keeps_childless_rows() {
    let (registry, db) = setup();
    let tags = qs(&registry, "Tag")
        .filter(Q::filter("children__name", "t4") | Q::filter("name", "t2"))
        .unwrap();
    assert_eq!(strings(&tags, "name", &db), vec!["t2", "t3"]);
}

#[test]
fn test_negated_nullable_relation_keeps_null_rows() {
    let (registry, db) = setup();
    let tags = qs(&registry, "Tag")
        .exclude(Q::filter("parent__name", "t1"))
        .unwrap();
    assert_eq!(strings(&tags, "name", &db), vec!["t1", "t4"]);

    let roots = qs(&registry, "Tag")
        .filter(Q::filter("parent__isnull", true))
        .unwrap();
    assert_eq!(strings(&roots, "name", &db), vec!["t1"]);
}

#[test]
fn test_negated_foreign_key_forms_agree_on_null_rows() {
    let (registry, db) = setup();
    for key in ["parent", "parent__id", "parent__pk", "parent__id__exact"] {
        let tags = qs(&registry, "Tag").exclude(Q::filter(key, 3)).unwrap();
        assert_eq!(strings(&tags, "name", &db), vec!["t1", "t2", "t3"], "{key}");
    }

    let not_in = qs(&registry, "Tag")
        .exclude(Q::filter("parent__id__in", Value::list([1, 3])))
        .unwrap();
    assert_eq!(strings(&not_in, "name", &db), vec!["t1"]);
}

#[test]
fn test_dates_are_distinct_and_ordered() {
    let (registry, db) = setup();
    let years = qs(&registry, "Article")
        .dates("pub_date", DateKind::Year, OrderDirection::Asc, &db)
        .unwrap();
    let expected: Vec<NaiveDateTime> = [2005, 2006, 2007]
        .into_iter()
        .map(|y| NaiveDate::from_ymd_opt(y, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap())
        .collect();
    assert_eq!(years, expected);

    let months = qs(&registry, "Article")
        .dates("pub_date", DateKind::Month, OrderDirection::Desc, &db)
        .unwrap();
    assert_eq!(months.len(), 3);
    assert_eq!(
        months[0],
        NaiveDate::from_ymd_opt(2007, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
    );
}

#[test]
fn test_year_lookup_and_date_values() {
    let (registry, db) = setup();
    let articles = qs(&registry, "Article")
        .filter(Q::filter("pub_date__year", 2005))
        .unwrap();
    assert_eq!(articles.count(&db).unwrap(), 2);

    let row = qs(&registry, "Article")
        .get(Q::filter("pk", 3), &db)
        .unwrap();
    assert_eq!(
        row.get::<NaiveDate>("pub_date").unwrap(),
        NaiveDate::from_ymd_opt(2006, 1, 17).unwrap()
    );
}

#[test]
fn test_distinct_values_count() {
    let (registry, db) = setup();
    let reporters = qs(&registry, "Article")
        .values(&["reporter__first_name", "reporter__last_name"])
        .unwrap()
        .distinct(true);
    assert_eq!(reporters.count(&db).unwrap(), 2);
    assert_eq!(qs(&registry, "Article").count(&db).unwrap(), 4);
}

#[test]
fn test_values_rows_use_lookup_names() {
    let (registry, db) = setup();
    let rows = qs(&registry, "Article")
        .filter(Q::filter("headline", "Paul's story"))
        .unwrap()
        .values(&["headline", "reporter__first_name"])
        .unwrap()
        .fetch(&db)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String>("reporter__first_name").unwrap(), "Paul");
}

#[test]
fn test_get_cardinality_errors() {
    let (registry, db) = setup();
    let articles = qs(&registry, "Article");
    assert!(matches!(
        articles.get(Q::filter("headline", "missing"), &db),
        Err(RelqError::DoesNotExist(_))
    ));
    assert!(matches!(
        articles.get(Q::filter("reporter__first_name", "John"), &db),
        Err(RelqError::MultipleObjectsReturned(_))
    ));
}

#[test]
fn test_update_across_join() {
    let (registry, db) = setup();
    let changed = qs(&registry, "Article")
        .filter(Q::filter("reporter__first_name", "Paul"))
        .unwrap()
        .update([("headline", "Updated")], &db)
        .unwrap();
    assert_eq!(changed, 2);
    let updated = qs(&registry, "Article")
        .filter(Q::filter("headline", "Updated"))
        .unwrap();
    assert_eq!(updated.count(&db).unwrap(), 2);
}

#[test]
fn test_delete_cascades_with_foreign_keys_enforced() {
    let (registry, db) = setup();
    let deleted = qs(&registry, "Reporter")
        .filter(Q::filter("first_name", "John"))
        .unwrap()
        .delete(&db)
        .unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(qs(&registry, "Article").count(&db).unwrap(), 2);
    assert_eq!(qs(&registry, "Reporter").count(&db).unwrap(), 1);
}

#[test]
fn test_delete_clears_m2m_rows() {
    let (registry, db) = setup();
    qs(&registry, "Item")
        .filter(Q::filter("name", "one"))
        .unwrap()
        .delete(&db)
        .unwrap();
    let links = db
        .query("SELECT COUNT(*) FROM \"queries_item_tags\"", &[])
        .unwrap();
    assert_eq!(links[0].get_by_index::<i64>(0).unwrap(), 3);
}

#[test]
fn test_inherited_create_and_fetch() {
    let (registry, db) = setup();
    let restaurants = qs(&registry, "Restaurant");
    let pk = restaurants
        .create(
            [
                ("name", Value::from("Demon Dogs")),
                ("address", Value::from("944 W. Fullerton")),
                ("serves_pizza", Value::from(true)),
            ],
            &db,
        )
        .unwrap();
    assert_eq!(pk, Value::Int(1));

    let row = restaurants
        .get(Q::filter("name", "Demon Dogs"), &db)
        .unwrap();
    assert_eq!(row.get::<String>("address").unwrap(), "944 W. Fullerton");
    assert!(row.get::<bool>("serves_pizza").unwrap());
    assert_eq!(qs(&registry, "Place").count(&db).unwrap(), 1);

    restaurants.delete(&db).unwrap();
    assert_eq!(qs(&registry, "Place").count(&db).unwrap(), 0);
}

#[test]
fn test_regex_lookups() {
    let (registry, db) = setup();
    let regex = qs(&registry, "Article")
        .filter(Q::filter("headline__regex", "^This"))
        .unwrap();
    assert_eq!(regex.count(&db).unwrap(), 2);
    let iregex = qs(&registry, "Article")
        .filter(Q::filter("headline__iregex", "^this"))
        .unwrap();
    assert_eq!(iregex.count(&db).unwrap(), 2);
}

#[test]
fn test_slicing_and_reverse() {
    let (registry, db) = setup();
    let middle = qs(&registry, "Article").slice(Some(1), Some(3));
    assert_eq!(
        strings(&middle, "headline", &db),
        vec!["Paul's story", "This is a test"]
    );
    assert_eq!(middle.count(&db).unwrap(), 2);

    let last = qs(&registry, "Article").reverse().slice(None, Some(1));
    assert_eq!(strings(&last, "headline", &db), vec!["This is a test too"]);

    let tail = qs(&registry, "Article").slice(Some(3), None);
    assert_eq!(strings(&tail, "headline", &db), vec!["This is a test too"]);
}

#[test]
fn test_none_and_exists() {
    let (registry, db) = setup();
    assert!(qs(&registry, "Article").exists(&db).unwrap());
    let none = qs(&registry, "Article").none();
    assert!(!none.exists(&db).unwrap());
    assert!(none.fetch(&db).unwrap().is_empty());
}
