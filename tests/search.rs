mod common;

use common::*;
use eumds::{Error, ProductReference, Result, search};
use mockito::{Matcher, Server};

fn ids(products: &[ProductReference]) -> Vec<&str> {
    products.iter().map(|p| p.id.as_str()).collect()
}

#[test]
fn search_crosses_page_boundaries() {
    let mut server = Server::new();
    let token = mock_token(&mut server);
    let page1 = mock_search_page(&mut server, 0, 5, &["A", "B"]);
    let page2 = mock_search_page(&mut server, 2, 5, &["C", "D"]);
    let page3 = mock_search_page(&mut server, 4, 5, &["E"]);

    let session = client(&server).authenticate().unwrap();
    let mut pages = search(&session, query());
    assert_eq!(pages.total(), None);

    let products: Vec<ProductReference> = pages.by_ref().collect::<Result<_>>().unwrap();
    assert_eq!(ids(&products), ["A", "B", "C", "D", "E"]);
    assert_eq!(pages.total(), Some(5));
    assert_eq!(products[0].collection.as_deref(), Some(COLLECTION));
    assert_eq!(products[0].size_bytes, Some(1024));

    token.assert();
    page1.assert();
    page2.assert();
    page3.assert();
}

#[test]
fn repeated_search_yields_the_same_sequence() {
    let mut server = Server::new();
    let _token = mock_token(&mut server);
    let page1 = search_page_mock(&mut server, 0, 3, &["A", "B"])
        .expect(2)
        .create();
    let page2 = search_page_mock(&mut server, 2, 3, &["C"]).expect(2).create();

    let session = client(&server).authenticate().unwrap();
    let first: Vec<_> = search(&session, query()).collect::<Result<_>>().unwrap();
    let second: Vec<_> = search(&session, query()).collect::<Result<_>>().unwrap();

    assert_eq!(first, second);
    assert_eq!(ids(&first), ["A", "B", "C"]);
    page1.assert();
    page2.assert();
}

#[test]
fn zero_matches_is_an_empty_sequence() {
    let mut server = Server::new();
    let _token = mock_token(&mut server);
    let page = mock_search_page(&mut server, 0, 0, &[]);

    let session = client(&server).authenticate().unwrap();
    let products: Vec<_> = search(&session, query()).collect::<Result<_>>().unwrap();

    assert!(products.is_empty());
    page.assert();
}

#[test]
fn short_last_page_ends_the_sequence() {
    // The catalog claims more results than it actually returns.
    let mut server = Server::new();
    let _token = mock_token(&mut server);
    let _page1 = mock_search_page(&mut server, 0, 10, &["A", "B"]);
    let page2 = mock_search_page(&mut server, 2, 10, &[]);

    let session = client(&server).authenticate().unwrap();
    let products: Vec<_> = search(&session, query()).collect::<Result<_>>().unwrap();

    assert_eq!(ids(&products), ["A", "B"]);
    page2.assert();
}

#[test]
fn rejected_query_is_a_query_error() {
    let mut server = Server::new();
    let _token = mock_token(&mut server);
    let page = server
        .mock("GET", "/data/search-products/os")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"message":"Invalid value for dtstart"}"#)
        .expect(1)
        .create();

    let session = client(&server).authenticate().unwrap();
    let mut pages = search(&session, query());

    match pages.next() {
        Some(Err(Error::Query(msg))) => assert!(msg.contains("dtstart")),
        other => panic!("expected a query error, got {:?}", other),
    }
    assert!(pages.next().is_none());
    page.assert();
}

#[test]
fn unavailable_catalog_is_retried_then_reported() {
    let mut server = Server::new();
    let _token = mock_token(&mut server);
    // One attempt plus two retries.
    let page = server
        .mock("GET", "/data/search-products/os")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("Service Unavailable")
        .expect(3)
        .create();

    let session = client(&server).authenticate().unwrap();
    let result: Result<Vec<_>> = search(&session, query()).collect();

    assert!(matches!(result, Err(Error::Network(_))));
    page.assert();
}

#[test]
fn bounding_box_is_sent_to_the_catalog() {
    let mut server = Server::new();
    let _token = mock_token(&mut server);
    let page = server
        .mock("GET", "/data/search-products/os")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("bbox".into(), "14,14,15,16".into()),
            Matcher::UrlEncoded("dtstart".into(), "2021-01-05T00:00:00.000000Z".into()),
            Matcher::UrlEncoded("dtend".into(), "2021-01-05T12:00:00.000000Z".into()),
        ]))
        .with_status(200)
        .with_body(search_page(1, &["IASI-1"]))
        .create();

    let session = client(&server).authenticate().unwrap();
    let q = query().with_bbox(eumds::BoundingBox::new(14.0, 14.0, 15.0, 16.0).unwrap());
    let products: Vec<_> = search(&session, q).collect::<Result<_>>().unwrap();

    assert_eq!(ids(&products), ["IASI-1"]);
    page.assert();
}
