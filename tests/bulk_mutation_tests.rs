//! HTTP tests for single and bulk writes: create, update, patch-all, delete

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use common::{builder, create_test_server, create_test_server_with, ids, seeded_store};
use dynrest::prelude::*;

fn patch_all_settings() -> DynamicRestSettings {
    DynamicRestSettings {
        enable_patch_all: true,
        ..Default::default()
    }
}

// =============================================================================
// Create
// =============================================================================

mod create_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_single() {
        let (server, store) = create_test_server();

        let response = server.post("/dogs").json(&json!({"name": "Lucky"})).await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let body: Value = response.json();
        assert_eq!(body["dog"], json!({"id": 4, "name": "Lucky", "fur": null}));
        assert_eq!(store.count("dog").unwrap(), 4);
    }

    #[tokio::test]
    async fn test_create_single_wrapped_in_singular_key() {
        let (server, _) = create_test_server();

        let response = server
            .post("/dogs")
            .json(&json!({"dog": {"name": "Lucky", "fur": "black"}}))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let body: Value = response.json();
        assert_eq!(body["dog"]["fur"], "black");
    }

    #[tokio::test]
    async fn test_create_cleans_and_ignores_read_only() {
        let (server, _) = create_test_server();

        let response = server
            .post("/users?include[]=location.")
            .json(&json!({
                "name": "  erin ",
                "location": 2,
                "groups": [1],
                "date_joined": "1999-12-31",
                "nickname": "e"
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let body: Value = response.json();
        assert_eq!(body["user"]["name"], "erin");
        assert_eq!(body["user"]["location"], 2);
        assert_eq!(body["user"]["groups"], json!([1]));
        assert_eq!(body["user"]["date_joined"], Value::Null);
        assert!(body["user"].get("nickname").is_none());
        assert_eq!(body["linked"]["location"][0]["name"], "Garage");
    }

    #[tokio::test]
    async fn test_create_missing_required_field() {
        let (server, store) = create_test_server();

        let response = server.post("/dogs").json(&json!({"fur": "black"})).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["details"]["fields"][0]["field"], "name");
        assert_eq!(body["details"]["fields"][0]["message"], "This field is required.");
        assert_eq!(store.count("dog").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_create_wrong_relation_type() {
        let (server, _) = create_test_server();

        let response = server
            .post("/users")
            .json(&json!({"name": "erin", "groups": 1}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_many_from_list() {
        let (server, store) = create_test_server();

        let response = server
            .post("/dogs")
            .json(&json!([{"name": "Lucky"}, {"name": "Max"}]))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let body: Value = response.json();
        assert_eq!(ids(&body["dogs"]), vec![4, 5]);
        assert!(body.get("errors").is_none());
        assert_eq!(store.count("dog").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_create_many_from_plural_key() {
        let (server, store) = create_test_server();

        let response = server
            .post("/dogs")
            .json(&json!({"dogs": [{"name": "Lucky"}]}))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        assert_eq!(store.count("dog").unwrap(), 4);
    }

    #[tokio::test]
    async fn test_create_many_is_all_or_nothing_by_default() {
        let (server, store) = create_test_server();

        let response = server
            .post("/dogs")
            .json(&json!([{"name": "Lucky"}, {"name": ""}]))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert_eq!(body["dogs"], json!([]));
        assert_eq!(body["errors"].as_array().unwrap().len(), 1);
        assert_eq!(body["errors"][0]["source"], json!({"name": ""}));
        assert_eq!(store.count("dog").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_create_many_store_failure_rolls_back() {
        let (server, store) = create_test_server();

        let response = server
            .post("/dogs")
            .json(&json!([{"name": "Lucky"}, {"name": "Fido"}]))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .starts_with("Failed to create records:")
        );
        assert_eq!(store.count("dog").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_partial_creation_keeps_valid_items() {
        let (server, store) = create_test_server_with(DynamicRestSettings {
            enable_bulk_partial_creation: true,
            ..Default::default()
        });

        let response = server
            .post("/dogs")
            .json(&json!([{"name": "Lucky"}, {"name": ""}, {"name": "Fido"}]))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert_eq!(body["dogs"].as_array().unwrap().len(), 1);
        assert_eq!(body["dogs"][0]["name"], "Lucky");

        let errors = body["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1]["source"], json!({"name": "Fido"}));
        assert!(errors[1]["detail"].as_str().unwrap().contains("duplicate"));
        assert_eq!(store.count("dog").unwrap(), 4);
    }
}

// =============================================================================
// Update
// =============================================================================

mod update_tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_and_patch_single() {
        let (server, _) = create_test_server();

        let response = server
            .put("/dogs/1")
            .json(&json!({"name": "Fido II", "fur": "grey"}))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["dog"], json!({"id": 1, "name": "Fido II", "fur": "grey"}));

        let response = server.patch("/dogs/1").json(&json!({"fur": "black"})).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["dog"]["name"], "Fido II");
        assert_eq!(body["dog"]["fur"], "black");
    }

    #[tokio::test]
    async fn test_replace_requires_required_fields() {
        let (server, _) = create_test_server();

        let response = server.put("/dogs/1").json(&json!({"fur": "black"})).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_read_only_field_is_ignored() {
        let (server, _) = create_test_server();

        let response = server
            .patch("/users/1")
            .json(&json!({"date_joined": "1999-12-31"}))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["user"]["date_joined"], "2020-01-01");
    }

    #[tokio::test]
    async fn test_update_unique_violation() {
        let (server, _) = create_test_server();

        let response = server.patch("/dogs/1").json(&json!({"name": "Spot"})).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert_eq!(body["code"], "CONSTRAINT_VIOLATION");
    }

    #[tokio::test]
    async fn test_update_missing_object() {
        let (server, _) = create_test_server();

        let response = server.patch("/dogs/42").json(&json!({"fur": "black"})).await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bulk_update_by_id() {
        let (server, _) = create_test_server();

        let response = server
            .patch("/dogs")
            .json(&json!([{"id": 1, "fur": "black"}, {"id": 2, "fur": "grey"}]))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(ids(&body["dogs"]), vec![1, 2]);

        let response = server.get("/dogs/2").await;
        let body: Value = response.json();
        assert_eq!(body["dog"]["fur"], "grey");
    }

    #[tokio::test]
    async fn test_bulk_update_with_missing_object() {
        let (server, _) = create_test_server();

        let response = server
            .patch("/dogs")
            .json(&json!([{"id": 1, "fur": "black"}, {"id": 99, "fur": "grey"}]))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert_eq!(body["message"], "Could not find all objects to update.");

        let response = server.get("/dogs/1").await;
        let body: Value = response.json();
        assert_eq!(body["dog"]["fur"], "brown");
    }

    #[tokio::test]
    async fn test_bulk_update_item_without_id() {
        let (server, _) = create_test_server();

        let response = server.patch("/dogs").json(&json!([{"fur": "black"}])).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert_eq!(body["details"]["items"][0]["detail"], "This item has no id.");
    }

    #[tokio::test]
    async fn test_bulk_update_repeated_id() {
        let (server, _) = create_test_server();

        let response = server
            .patch("/dogs")
            .json(&json!([{"id": 1, "fur": "gold"}, {"id": 1, "name": "Renamed"}]))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        let items = &body["details"]["items"];
        assert_eq!(items[0]["detail"], "This id appears more than once.");
        assert_eq!(items[0]["source"], json!({"id": 1, "name": "Renamed"}));

        let response = server.get("/dogs/1").await;
        let body: Value = response.json();
        assert_eq!(body["dog"]["name"], "Fido");
        assert_eq!(body["dog"]["fur"], "brown");
    }

    #[tokio::test]
    async fn test_bulk_update_disabled() {
        let (server, _) = create_test_server_with(DynamicRestSettings {
            enable_bulk_update: false,
            ..Default::default()
        });

        let response = server
            .patch("/dogs")
            .json(&json!([{"id": 1, "fur": "black"}]))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }
}

// =============================================================================
// Patch-All
// =============================================================================

mod patch_all_tests {
    use super::*;

    #[tokio::test]
    async fn test_patch_all_query_mode() {
        let (server, _) = create_test_server_with(patch_all_settings());

        let response = server
            .patch("/dogs?patch-all=query")
            .json(&json!({"fur": "black"}))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body, json!({"meta": {"updated": 3}}));

        let response = server.get("/dogs?filter{fur}=black").await;
        let body: Value = response.json();
        assert_eq!(ids(&body["dogs"]), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_patch_all_respects_filters() {
        let (server, _) = create_test_server_with(patch_all_settings());

        let response = server
            .patch("/dogs?filter{fur.contains}=brown&patch-all=true")
            .json(&json!({"fur": "black"}))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["meta"]["updated"], 2);

        let response = server.get("/dogs/2").await;
        let body: Value = response.json();
        assert_eq!(body["dog"]["fur"], "white");
    }

    #[tokio::test]
    async fn test_patch_all_loop_rolls_back_on_violation() {
        let (server, _) = create_test_server_with(patch_all_settings());

        let response = server
            .patch("/dogs?filter{fur.contains}=brown&patch-all=true")
            .json(&json!({"name": "Twin"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .starts_with("Failed to update records:")
        );

        let response = server.get("/dogs?filter{name}=Twin").await;
        let body: Value = response.json();
        assert_eq!(body["dogs"], json!([]));
    }

    #[tokio::test]
    async fn test_patch_all_query_violation() {
        let (server, _) = create_test_server_with(patch_all_settings());

        let response = server
            .patch("/dogs?patch-all=query")
            .json(&json!({"name": "Twin"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .starts_with("Failed to bulk-update records:")
        );
    }

    #[tokio::test]
    async fn test_patch_all_rejects_unknown_and_read_only_fields() {
        let (server, _) = create_test_server_with(patch_all_settings());

        let response = server
            .patch("/dogs?patch-all=query")
            .json(&json!({"color": "black"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["message"], "Unknown field: \"color\"");

        let response = server
            .patch("/users?patch-all=query")
            .json(&json!({"date_joined": "1999-12-31"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["message"], "Cannot update field: \"date_joined\"");
    }

    #[tokio::test]
    async fn test_patch_all_requires_object_payload() {
        let (server, _) = create_test_server_with(patch_all_settings());

        let response = server
            .patch("/dogs?patch-all=query")
            .json(&json!([{"fur": "black"}]))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_patch_all_invalid_mode() {
        let (server, _) = create_test_server_with(patch_all_settings());

        let response = server
            .patch("/dogs?patch-all=sometimes")
            .json(&json!({"fur": "black"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let body: Value = response.json();
        assert_eq!(body["code"], "PARSE_ERROR");
    }

    #[tokio::test]
    async fn test_patch_all_disabled_by_default() {
        let (server, _) = create_test_server();

        let response = server
            .patch("/dogs?patch-all=query")
            .json(&json!({"fur": "black"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let response = server.get("/dogs/2").await;
        let body: Value = response.json();
        assert_eq!(body["dog"]["fur"], "white");
    }
}

// =============================================================================
// Delete
// =============================================================================

mod delete_tests {
    use super::*;

    #[tokio::test]
    async fn test_destroy_single() {
        let (server, store) = create_test_server();

        let response = server.delete("/dogs/1").await;
        assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
        assert_eq!(store.count("dog").unwrap(), 2);

        let response = server.get("/dogs/1").await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_destroy_many() {
        let (server, store) = create_test_server();

        let response = server.delete("/dogs").json(&json!([1, {"id": 2}])).await;
        assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
        assert_eq!(store.count("dog").unwrap(), 1);

        let response = server.delete("/dogs").json(&json!({"dogs": [3]})).await;
        assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
        assert_eq!(store.count("dog").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_destroy_many_invalid_id() {
        let (server, store) = create_test_server();

        let response = server.delete("/dogs").json(&json!([1, true])).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(store.count("dog").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_destroy_collection_without_payload() {
        let (server, _) = create_test_server();

        let response = server.delete("/dogs").await;
        assert_eq!(response.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    }
}

// =============================================================================
// Permissions
// =============================================================================

mod permission_tests {
    use super::*;

    fn admin_only_deletes() -> TestServer {
        let store = seeded_store();
        let app = builder(&store, DynamicRestSettings::default())
            .with_auth_provider(HeaderAuthProvider)
            .with_permissions(
                "dog",
                PolicyPermissions::new().with_policy(Action::Delete, AuthPolicy::AdminOnly),
            )
            .build()
            .expect("Failed to build app");
        TestServer::new(app)
    }

    #[tokio::test]
    async fn test_anonymous_delete_is_forbidden() {
        let server = admin_only_deletes();

        let response = server.delete("/dogs/1").await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        let response = server.delete("/dogs").json(&json!([1, 2])).await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        // reads stay public
        let response = server.get("/dogs/1").await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_admin_delete_is_allowed() {
        let server = admin_only_deletes();

        let response = server
            .delete("/dogs/1")
            .add_header(
                HeaderName::from_static("x-user-id"),
                HeaderValue::from_static("7"),
            )
            .add_header(
                HeaderName::from_static("x-user-roles"),
                HeaderValue::from_static("admin"),
            )
            .await;
        assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
    }
}
