// Example: searchable dropdown. Search runs off-thread, results render virtualized.
use std::time::Duration;

use serde_json::{Value, json};
use vlist::{
    Container, Executor, Predicate, Recyclable, SearchQuery, SortSpec, TaskError, Virtualizer,
    VirtualizerOptions,
};

#[derive(Default)]
struct MenuItem {
    label: String,
}

impl Recyclable for MenuItem {
    fn reset(&mut self) {
        self.label.clear();
    }
}

#[derive(Default)]
struct Menu {
    visible: Vec<String>,
}

impl Container<MenuItem> for Menu {
    fn translate(&mut self, _offset: f64) {}

    fn replace_children(&mut self, children: &[(usize, &MenuItem)]) {
        self.visible = children.iter().map(|(_, o)| o.label.clone()).collect();
    }

    fn measure(&self, _node: &MenuItem) -> f64 {
        28.0
    }
}

fn main() -> Result<(), TaskError> {
    let countries: Vec<Value> = (0..20_000)
        .map(|i| {
            json!({
                "label": format!("Country {i:05}"),
                "region": (["north", "south", "east", "west"][i % 4]),
                "population": (i * 7_919) % 100_000,
            })
        })
        .collect();

    let mut executor = Executor::default();
    let timeout = Some(Duration::from_secs(2));

    let hits = executor
        .search(
            countries.clone(),
            SearchQuery::new("c 19").fuzzy().in_fields(["label"]).with_limit(500),
            timeout,
        )
        .wait()?;
    println!("fuzzy hits={} best={:?}", hits.len(), hits.first());

    let south = executor
        .filter(
            countries.clone(),
            Predicate::Equals {
                field: Some("region".into()),
                value: json!("south"),
            },
            timeout,
        )
        .wait()?;
    let ranked = executor
        .sort(south, SortSpec::by("population").descending(), timeout)
        .wait()?;
    println!("south={} most_populous={}", ranked.len(), ranked[0]["label"]);

    // Results feed a virtualized menu: only the visible slice gets nodes.
    let results: Vec<String> = hits
        .iter()
        .filter_map(|h| countries[h.index]["label"].as_str().map(str::to_owned))
        .collect();
    let mut v = Virtualizer::new(
        VirtualizerOptions::new(results.len(), 28.0).with_buffer(3),
        MenuItem::default,
    );
    let mut menu = Menu::default();
    let w = v.compute_window(0.0, 280.0);
    v.render(
        w.start_index,
        w.end_index,
        |i| results[i].as_str(),
        |node, label, _| node.label.push_str(label),
        &mut menu,
    );
    println!("menu window={w:?} visible={:?}", &menu.visible[..3.min(menu.visible.len())]);
    println!("pool={:?}", v.pool_stats());

    executor.destroy();
    println!("executor state after destroy={:?}", executor.state());
    Ok(())
}
