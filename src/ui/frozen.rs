/// Placeholder page shown in place of a frozen tab

use yew::prelude::*;
use wasm_bindgen::prelude::*;
use patternfly_yew::prelude::*;
use crate::placeholder::{PlaceholderParams, parse_query};

// Import JS bridge functions
#[wasm_bindgen(module = "/frozen.js")]
extern "C" {
    fn onSnapshot(callback: &js_sys::Function);
}

fn read_params() -> Option<PlaceholderParams> {
    let search = web_sys::window()?.location().search().ok()?;
    parse_query(&search)
}

fn navigate(url: &str) {
    let Some(window) = web_sys::window() else {
        return;
    };
    if let Err(e) = window.location().set_href(url) {
        log::error!("Navigation to {} failed: {:?}", url, e);
    }
}

#[function_component(FrozenPage)]
pub fn frozen_page() -> Html {
    let params = use_memo((), |_| read_params());
    let snapshot = use_state(|| None::<String>);

    // Keep the frozen page's title and receive the snapshot from the background
    {
        let params = params.clone();
        let snapshot = snapshot.clone();

        use_effect_with((), move |_| {
            if let (Some(params), Some(document)) = ((*params).as_ref(), web_sys::window().and_then(|w| w.document())) {
                document.set_title(&params.title);
            }

            let callback = Closure::wrap(Box::new(move |image: String| {
                snapshot.set(Some(image));
            }) as Box<dyn Fn(String)>);
            onSnapshot(callback.as_ref().unchecked_ref());
            callback.forget();
            || ()
        });
    }

    let Some(params) = (*params).clone() else {
        return html! {
            <div class="container">
                <Alert r#type={AlertType::Warning} title={"Nothing to restore"} inline={true}>
                    {"This placeholder does not know which page it replaced."}
                </Alert>
            </div>
        };
    };

    let on_restore = {
        let url = params.url.clone();
        Callback::from(move |_| navigate(&url))
    };

    html! {
        <div class="container frozen-page">
            <div class="header">
                if !params.icon.is_empty() {
                    <img class="frozen-icon" src={params.icon.clone()} alt="" />
                }
                <h1 class="main-title">{params.title.clone()}</h1>
            </div>
            <p class="frozen-url">{params.url.clone()}</p>

            <Button onclick={on_restore.clone()} variant={ButtonVariant::Primary}>
                {"Restore tab"}
            </Button>

            if let Some(image) = (*snapshot).clone() {
                <div class="frozen-snapshot" onclick={on_restore}>
                    <img src={image} alt="Snapshot of the frozen page" />
                </div>
            } else {
                <p class="frozen-hint">{"This tab was frozen to save memory. Click to reload it."}</p>
            }
        </div>
    }
}
