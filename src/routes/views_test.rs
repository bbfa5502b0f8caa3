use super::*;
use crate::state::test_helpers;

#[test]
fn home_is_rendered_eagerly_and_others_lazily() {
    let cache = ViewCache::new();
    assert!(cache.is_loaded(View::Home));
    assert!(!cache.is_loaded(View::Buyer));
    assert!(!cache.is_loaded(View::Seller));

    let _ = cache.get(View::Buyer);
    assert!(cache.is_loaded(View::Buyer));
    assert!(!cache.is_loaded(View::Seller));
}

#[test]
fn repeated_get_returns_same_render() {
    let cache = ViewCache::new();
    let first = cache.get(View::Seller).as_ptr();
    let second = cache.get(View::Seller).as_ptr();
    assert_eq!(first, second);
}

#[test]
fn every_view_links_to_every_route() {
    for view in View::ALL {
        let html = view.render();
        for target in View::ALL {
            assert!(
                html.contains(&format!(r#"href="{}""#, target.path())),
                "{view:?} is missing a link to {}",
                target.path()
            );
        }
    }
}

#[test]
fn chat_panel_only_on_buyer_and_seller() {
    assert!(!View::Home.render().contains("/api/ws"));
    assert!(View::Buyer.render().contains("/api/ws"));
    assert!(View::Seller.render().contains("/api/ws"));
}

#[test]
fn paths_match_routes() {
    assert_eq!(View::Home.path(), "/");
    assert_eq!(View::Buyer.path(), "/buyer");
    assert_eq!(View::Seller.path(), "/seller");
}

#[tokio::test]
async fn handlers_serve_cached_pages() {
    let (state, _backend) = test_helpers::test_app_state();
    assert!(!state.views.is_loaded(View::Buyer));

    let Html(page) = buyer(State(state.clone())).await;
    assert!(page.contains("<title>Buy</title>"));
    assert!(state.views.is_loaded(View::Buyer));

    let Html(page) = home(State(state.clone())).await;
    assert!(page.contains("<title>Marketplace</title>"));

    let Html(page) = seller(State(state)).await;
    assert!(page.contains("<title>Sell</title>"));
}
