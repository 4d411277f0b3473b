//! Pet registry served with dynamic field selection and sideloading
//!
//! This example demonstrates:
//! - Declaring resources with plain, computed, count and relation fields
//! - Sideloading owners, groups and permissions with `include[]`
//! - Bulk create, bulk update, patch-all and bulk delete
//! - Per-resource permissions from `x-user-id` / `x-user-roles` headers

use dynrest::prelude::*;
use tracing_subscriber::EnvFilter;

fn schemas() -> Vec<ResourceSchema> {
    vec![
        ResourceSchema::new("location").field(FieldSpec::plain("name")),
        ResourceSchema::new("permission").field(FieldSpec::plain("name")),
        ResourceSchema::new("group")
            .field(FieldSpec::plain("name").required())
            .field(FieldSpec::relation_many("permissions", "permission")),
        ResourceSchema::new("user")
            .defer_many_relations(true)
            .field(
                FieldSpec::plain("name")
                    .required()
                    .filter(filters::trim())
                    .validate(validators::not_blank()),
            )
            .field(FieldSpec::relation_one("location", "location"))
            .field(FieldSpec::relation_many("groups", "group"))
            .field(FieldSpec::count("num_groups", "groups").deferred(true))
            .field(FieldSpec::relation_many("pets", "dog").deferred(true)),
        ResourceSchema::new("dog")
            .field(
                FieldSpec::plain("name")
                    .required()
                    .validate(validators::string_length(1, 30)),
            )
            .field(FieldSpec::plain("fur").source("fur_color").filter(filters::lowercase()))
            .field(FieldSpec::relation_one("owner", "user").immutable())
            .field(
                FieldSpec::computed("shout", |dog, _| {
                    dog.attr("name")
                        .and_then(Value::as_str)
                        .map(|name| json!(format!("{}!", name.to_uppercase())))
                        .unwrap_or(Value::Null)
                })
                .deferred(true),
            )
            .field(FieldSpec::plain("checked_at").read_only()),
    ]
}

fn seed(store: &InMemoryStore) -> Result<()> {
    let rows = vec![
        Record::new("location").with_id(1).with_attr("name", "Downtown"),
        Record::new("location").with_id(2).with_attr("name", "Harbor"),
        Record::new("permission").with_id(1).with_attr("name", "feed"),
        Record::new("permission").with_id(2).with_attr("name", "walk"),
        Record::new("group")
            .with_id(1)
            .with_attr("name", "walkers")
            .with_many(
                "permissions",
                vec![RecordKey::new("permission", 1), RecordKey::new("permission", 2)],
            ),
        Record::new("group")
            .with_id(2)
            .with_attr("name", "feeders")
            .with_many("permissions", vec![RecordKey::new("permission", 1)]),
        Record::new("user")
            .with_id(1)
            .with_attr("name", "Ann")
            .with_one("location", Some(RecordKey::new("location", 1)))
            .with_many("groups", vec![RecordKey::new("group", 1), RecordKey::new("group", 2)])
            .with_many("pets", vec![RecordKey::new("dog", 1), RecordKey::new("dog", 2)]),
        Record::new("user")
            .with_id(2)
            .with_attr("name", "Ben")
            .with_one("location", Some(RecordKey::new("location", 2)))
            .with_many("groups", vec![RecordKey::new("group", 2)])
            .with_many("pets", vec![RecordKey::new("dog", 3)]),
        Record::new("dog")
            .with_id(1)
            .with_attr("name", "Fido")
            .with_attr("fur_color", "brown")
            .with_one("owner", Some(RecordKey::new("user", 1))),
        Record::new("dog")
            .with_id(2)
            .with_attr("name", "Spot")
            .with_attr("fur_color", "white")
            .with_one("owner", Some(RecordKey::new("user", 1))),
        Record::new("dog")
            .with_id(3)
            .with_attr("name", "Rex")
            .with_attr("fur_color", "gold")
            .with_one("owner", Some(RecordKey::new("user", 2))),
    ];
    for row in rows {
        store.insert(row)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,dynrest=debug")),
        )
        .init();

    println!("🐾 dynrest pet registry");
    println!("========================\n");

    // dog names are unique; every saved dog gets a check timestamp
    let store = InMemoryStore::new()
        .with_unique("dog", "name")
        .with_save_hook("dog", |dog| {
            let stamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            dog.attributes.insert("checked_at".to_string(), json!(stamp));
            Ok(())
        });
    seed(&store)?;
    println!("✅ Seeded {} users and {} dogs\n", store.count("user")?, store.count("dog")?);

    let settings = DynamicRestSettings {
        enable_patch_all: true,
        enable_bulk_partial_creation: true,
        ..Default::default()
    };

    // only admins may delete users; users may only edit themselves
    let user_permissions = PolicyPermissions::new()
        .with_policy(Action::Delete, AuthPolicy::AdminOnly)
        .with_policy(Action::Update, AuthPolicy::Or(vec![AuthPolicy::AdminOnly, AuthPolicy::Owner]))
        .with_owner_field("id");

    let builder = schemas().into_iter().fold(
        ServerBuilder::new()
            .with_store(store)
            .with_settings(settings)
            .with_auth_provider(HeaderAuthProvider)
            .with_permissions("user", user_permissions),
        ServerBuilder::register,
    );

    println!("📖 Try:");
    println!("   curl 'http://127.0.0.1:3000/users?include[]=groups.permissions.'");
    println!("   curl 'http://127.0.0.1:3000/dogs?include[]=owner.location.&include[]=shout'");
    println!("   curl 'http://127.0.0.1:3000/dogs?filter{{fur.in}}=[brown,gold]&sort[]=-name'");
    println!("   curl 'http://127.0.0.1:3000/users/1/pets?exclude[]=owner'");
    println!("   curl -X POST http://127.0.0.1:3000/dogs -H 'content-type: application/json' \\");
    println!("        -d '[{{\"name\": \"Lou\", \"owner\": 2}}, {{\"name\": \"\"}}]'");
    println!("   curl -X PATCH 'http://127.0.0.1:3000/dogs?filter{{owner}}=1&patch-all=true' \\");
    println!("        -H 'content-type: application/json' -d '{{\"fur\": \"Black\"}}'");
    println!("   curl -X DELETE http://127.0.0.1:3000/users/2 -H 'x-user-id: 9' -H 'x-user-roles: admin'");
    println!();

    builder.serve("127.0.0.1:3000").await
}
