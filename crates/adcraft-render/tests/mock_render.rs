use adcraft_render::{
    render_document, select_factory, CancelToken, CaptureQuality, DriverConfig, MockBehavior,
    MockFactory, BrowserFactory, RenderConfig, RenderError,
};
use adcraft_schema::Size;
use std::time::Duration;

#[test]
fn one_browser_renders_many_sizes() {
    let factory = MockFactory::new(MockBehavior::default());
    let mut browser = factory.launch().unwrap();
    let config = RenderConfig::instant();
    let token = CancelToken::new();
    for size in [Size::new(300, 250), Size::new(728, 90), Size::new(160, 600)] {
        let capture =
            render_document(browser.as_mut(), "<html></html>", size, &config, &token).unwrap();
        let img = image::load_from_memory(&capture.png).unwrap();
        assert_eq!((img.width(), img.height()), (size.width, size.height));
        assert_eq!(capture.quality, CaptureQuality::Ready);
    }
    browser.close().unwrap();
    let events = factory.events();
    assert_eq!(events.iter().filter(|e| e.starts_with("new_page")).count(), 3);
    assert_eq!(events.iter().filter(|e| *e == "close_page").count(), 3);
    assert_eq!(factory.launch_count(), 1);
}

#[test]
fn deadline_cancels_a_never_ready_render() {
    let factory = MockFactory::new(MockBehavior {
        ready_after_polls: None,
        ..MockBehavior::default()
    });
    let mut browser = factory.launch().unwrap();
    let config = RenderConfig {
        ready_timeout_ms: 10_000,
        ..RenderConfig::instant()
    };
    let token = CancelToken::with_timeout(Duration::from_millis(100));
    let err = render_document(browser.as_mut(), "", Size::new(10, 10), &config, &token)
        .unwrap_err();
    assert!(matches!(err, RenderError::Cancelled));
    assert_eq!(factory.events().last().map(String::as_str), Some("close_page"));
}

#[test]
fn mock_backend_is_selectable_by_name() {
    let factory = select_factory("mock", &DriverConfig::default(), &RenderConfig::default()).unwrap();
    let mut browser = factory.launch().unwrap();
    assert_eq!(browser.name(), "mock");
    let capture = render_document(
        browser.as_mut(),
        "",
        Size::new(2, 2),
        &RenderConfig::instant(),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(!capture.png.is_empty());
}
