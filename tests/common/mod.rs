//! Shared fixtures for the HTTP integration tests
//!
//! The fixture domain: users with a location and groups, groups with
//! permissions, and dogs. Every test gets a fresh store seeded with the same
//! rows so ids are predictable.

#![allow(dead_code)]

use axum_test::TestServer;
use dynrest::prelude::*;

pub fn schemas() -> Vec<ResourceSchema> {
    vec![
        ResourceSchema::new("location").field(FieldSpec::plain("name")),
        ResourceSchema::new("permission").field(FieldSpec::plain("name")),
        ResourceSchema::new("group")
            .field(FieldSpec::plain("name"))
            .field(FieldSpec::relation_many("permissions", "permission")),
        ResourceSchema::new("user")
            .field(
                FieldSpec::plain("name")
                    .required()
                    .filter(filters::trim())
                    .validate(validators::not_blank()),
            )
            .field(FieldSpec::relation_one("location", "location"))
            .field(FieldSpec::relation_many("groups", "group"))
            .field(FieldSpec::count("num_groups", "groups").deferred(true))
            .field(FieldSpec::plain("date_joined").read_only()),
        ResourceSchema::new("dog")
            .field(
                FieldSpec::plain("name")
                    .required()
                    .validate(validators::not_blank()),
            )
            .field(FieldSpec::plain("fur").source("fur_color")),
    ]
}

pub fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new().with_unique("dog", "name");

    let rows = vec![
        Record::new("location").with_id(1).with_attr("name", "Kitchen"),
        Record::new("location").with_id(2).with_attr("name", "Garage"),
        Record::new("permission").with_id(1).with_attr("name", "read"),
        Record::new("permission").with_id(2).with_attr("name", "write"),
        Record::new("group")
            .with_id(1)
            .with_attr("name", "admins")
            .with_many(
                "permissions",
                vec![RecordKey::new("permission", 1), RecordKey::new("permission", 2)],
            ),
        Record::new("group")
            .with_id(2)
            .with_attr("name", "staff")
            .with_many("permissions", vec![RecordKey::new("permission", 1)]),
        Record::new("user")
            .with_id(1)
            .with_attr("name", "alice")
            .with_attr("date_joined", "2020-01-01")
            .with_one("location", Some(RecordKey::new("location", 1)))
            .with_many("groups", vec![RecordKey::new("group", 1), RecordKey::new("group", 2)]),
        Record::new("user")
            .with_id(2)
            .with_attr("name", "bob")
            .with_one("location", Some(RecordKey::new("location", 1)))
            .with_many("groups", vec![RecordKey::new("group", 2)]),
        Record::new("user")
            .with_id(3)
            .with_attr("name", "carol")
            .with_one("location", Some(RecordKey::new("location", 2)))
            .with_many("groups", vec![]),
        Record::new("user")
            .with_id(4)
            .with_attr("name", "dave")
            .with_one("location", None)
            .with_many("groups", vec![RecordKey::new("group", 1)]),
        Record::new("dog")
            .with_id(1)
            .with_attr("name", "Fido")
            .with_attr("fur_color", "brown"),
        Record::new("dog")
            .with_id(2)
            .with_attr("name", "Spot")
            .with_attr("fur_color", "white"),
        Record::new("dog")
            .with_id(3)
            .with_attr("name", "Rex")
            .with_attr("fur_color", "light-brown"),
    ];
    for row in rows {
        store.insert(row).expect("Failed to seed store");
    }
    store
}

pub fn builder(store: &InMemoryStore, settings: DynamicRestSettings) -> ServerBuilder {
    schemas().into_iter().fold(
        ServerBuilder::new()
            .with_store(store.clone())
            .with_settings(settings),
        ServerBuilder::register,
    )
}

pub fn create_test_server_with(settings: DynamicRestSettings) -> (TestServer, InMemoryStore) {
    let store = seeded_store();
    let app = builder(&store, settings)
        .build()
        .expect("Failed to build app");
    let server = TestServer::new(app);
    (server, store)
}

pub fn create_test_server() -> (TestServer, InMemoryStore) {
    create_test_server_with(DynamicRestSettings::default())
}

/// The `id`s of a rendered list, in order
pub fn ids(entries: &Value) -> Vec<i64> {
    entries
        .as_array()
        .map(|items| items.iter().filter_map(|e| e["id"].as_i64()).collect())
        .unwrap_or_default()
}
