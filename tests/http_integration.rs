//! Integration tests for the provider over HTTP using wiremock
//!
//! These run the provider against a mocked AEP server and check the requests
//! it sends and how it interprets the responses.

use hemmer_provider_aep::openapi::OpenApi;
use hemmer_provider_aep::{AepProvider, HttpExecutor, ProviderConfig, ProviderError, ProviderService};
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FIXTURE: &str = include_str!("fixtures/bookstore.json");

fn provider_for(server: &MockServer) -> AepProvider {
    let document = OpenApi::from_json(FIXTURE).expect("Fixture should parse");
    let config = ProviderConfig::new("bookstore.json").with_server_url(server.uri());
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("Client should build");
    AepProvider::new(document, config, HttpExecutor::with_client(client))
        .expect("Provider should build")
}

fn book_body(path: &str) -> serde_json::Value {
    json!({
        "path": path,
        "price": 12.5,
        "published": true,
        "edition": 2,
        "isbn": ["978-0441013593"],
        "author": [{"firstName": "Frank", "lastName": "Herbert"}],
        "metadata": {"genre": "sf"}
    })
}

mod resource_tests {
    use super::*;

    /// Create sends only user-settable fields and reads back the result
    #[tokio::test]
    async fn test_create_publisher() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/publishers"))
            .and(body_json(json!({"description": "pub-description"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "description": "pub-description",
                "path": "/publishers/1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/publishers/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "description": "pub-description",
                "path": "/publishers/1",
                "etag": "abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let state = provider
            .create("aep_publisher", json!({"description": "pub-description"}))
            .await
            .expect("Create should succeed");

        assert_eq!(state["id"], "1");
        assert_eq!(state["path"], "/publishers/1");
        assert_eq!(state["description"], "pub-description");
    }

    /// A user-chosen id travels as the `id` query parameter
    #[tokio::test]
    async fn test_create_book_with_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/publishers/1/books"))
            .and(query_param("id", "dune"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(book_body("/publishers/1/books/dune")),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/publishers/1/books/dune"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(book_body("/publishers/1/books/dune")),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let state = provider
            .create(
                "aep_book",
                json!({
                    "id": "dune",
                    "publisher": "/publishers/1",
                    "price": 12.5,
                    "published": true,
                    "edition": 2,
                    "isbn": ["978-0441013593"],
                    "author": [{"first_name": "Frank", "last_name": "Herbert"}],
                    "metadata": "{\"genre\":\"sf\"}"
                }),
            )
            .await
            .expect("Create should succeed");

        assert_eq!(state["id"], "dune");
        assert_eq!(state["publisher"], "/publishers/1");
        assert_eq!(state["author"][0]["first_name"], "Frank");
        assert_eq!(state["metadata"], "{\"genre\":\"sf\"}");
        assert_eq!(state["edition"], json!(2));
    }

    /// An error body on a success status is surfaced verbatim
    #[tokio::test]
    async fn test_create_embedded_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/publishers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 3,
                "message": "description must not be empty"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .create("aep_publisher", json!({"description": ""}))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Remote(_)));
        assert_eq!(err.message(), "description must not be empty");
    }

    /// A failure status carries the server's error message
    #[tokio::test]
    async fn test_create_conflict() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/publishers"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": {"code": 409, "message": "publisher already exists"}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .create("aep_publisher", json!({"description": "d"}))
            .await
            .unwrap_err();

        assert_eq!(err.message(), "publisher already exists");
    }

    /// A server path disagreeing with the requested id is rejected
    #[tokio::test]
    async fn test_create_identity_mismatch() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/publishers/1/books"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(book_body("/publishers/1/books/other")),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/publishers/1/books/other"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(book_body("/publishers/1/books/other")),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .create(
                "aep_book",
                json!({"id": "dune", "publisher": "1", "price": 1, "published": false,
                       "edition": 1, "isbn": [], "author": [], "metadata": "null"}),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Identity(_)));
    }

    /// A resource deleted out of band reads as null
    #[tokio::test]
    async fn test_read_missing_resource() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/publishers/1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "message": "not found"}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let state = provider
            .read(
                "aep_publisher",
                json!({"id": "1", "path": "/publishers/1", "description": "d"}),
            )
            .await
            .expect("Read should succeed");

        assert_eq!(state, serde_json::Value::Null);
    }

    /// Update patches only user-settable fields
    #[tokio::test]
    async fn test_update_publisher() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/publishers/1"))
            .and(body_json(json!({"description": "updated"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "description": "updated",
                "path": "/publishers/1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/publishers/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "description": "updated",
                "path": "/publishers/1"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let prior = json!({"id": "1", "path": "/publishers/1", "description": "d"});
        let plan = provider
            .plan("aep_publisher", Some(prior.clone()), json!({"description": "updated"}))
            .await
            .expect("Plan should succeed");
        assert!(!plan.requires_replace);

        let state = provider
            .update("aep_publisher", prior, plan.planned_state)
            .await
            .expect("Update should succeed");
        assert_eq!(state["description"], "updated");
        assert_eq!(state["id"], "1");
    }

    /// Deleting twice succeeds
    #[tokio::test]
    async fn test_delete_tolerates_missing() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/publishers/1"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        provider
            .delete("aep_publisher", json!({"id": "1", "description": "d"}))
            .await
            .expect("Delete should succeed");
    }
}

mod collection_tests {
    use super::*;

    /// Listing follows page tokens and reattaches the parent
    #[tokio::test]
    async fn test_list_books_across_pages() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/publishers/1/books"))
            .and(query_param("page_token", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [book_body("/publishers/1/books/b")]
            })))
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/publishers/1/books"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [book_body("/publishers/1/books/a")],
                "next_page_token": "next"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let listed = provider
            .read_data_source("aep_books", json!({"publisher": "/publishers/1"}))
            .await
            .expect("List should succeed");

        let results = listed["results"].as_array().expect("results should be a list");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["id"], "a");
        assert_eq!(results[1]["id"], "b");
        assert_eq!(results[1]["publisher"], "/publishers/1");
        assert_eq!(results[0]["author"][0]["last_name"], "Herbert");
    }

    /// Import reads the resource at the given path
    #[tokio::test]
    async fn test_import_book() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/publishers/7/books/dune"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(book_body("/publishers/7/books/dune")),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let imported = provider
            .import_resource("aep_book", "/publishers/7/books/dune")
            .await
            .expect("Import should succeed");

        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].state["id"], "dune");
        assert_eq!(imported[0].state["publisher"], "/publishers/7");
        assert_eq!(imported[0].state["price"], json!(12.5));
    }
}

mod loading_tests {
    use super::*;

    /// The description can be fetched over HTTP
    #[tokio::test]
    async fn test_load_description_from_url() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/openapi.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FIXTURE))
            .expect(1)
            .mount(&server)
            .await;

        let config = ProviderConfig::new(format!("{}/openapi.json", server.uri()));
        let provider = AepProvider::from_config(config)
            .await
            .expect("Provider should load");

        assert_eq!(provider.registry().len(), 2);
        assert_eq!(
            provider.base_url().await.expect("Base URL should resolve"),
            "http://localhost:8081"
        );
        let metadata = provider.metadata();
        assert_eq!(metadata.resources, vec!["aep_book", "aep_publisher"]);
    }

    /// A missing description is a configuration-time failure
    #[tokio::test]
    async fn test_load_description_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/openapi.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = ProviderConfig::new(format!("{}/openapi.json", server.uri()));
        assert!(AepProvider::from_config(config).await.is_err());
    }
}
