// Example: a million-row list rendered through a bounded node pool.
use vlist::{Container, Recyclable, Virtualizer, VirtualizerOptions};

#[derive(Default)]
struct Label {
    text: String,
    height: f64,
}

impl Recyclable for Label {
    fn reset(&mut self) {
        self.text.clear();
        self.height = 0.0;
    }
}

/// Stand-in for a scrolling host surface.
#[derive(Default)]
struct Surface {
    offset: f64,
    rows: Vec<(usize, String)>,
}

impl Container<Label> for Surface {
    fn translate(&mut self, offset: f64) {
        self.offset = offset;
    }

    fn replace_children(&mut self, children: &[(usize, &Label)]) {
        self.rows = children
            .iter()
            .map(|(i, label)| (*i, label.text.clone()))
            .collect();
    }

    fn measure(&self, node: &Label) -> f64 {
        node.height
    }
}

fn main() {
    let mut v = Virtualizer::new(VirtualizerOptions::new(1_000_000, 40.0), Label::default);
    let mut surface = Surface::default();

    for scroll in [0.0, 1_234.0, 2_000_000.0, 39_999_400.0] {
        let w = v.compute_window(scroll, 600.0);
        v.render(
            w.start_index,
            w.end_index,
            |i| i,
            |label, i, _| {
                label.text = format!("row {i}");
                // Every tenth row wraps onto a second line.
                label.height = if i % 10 == 0 { 80.0 } else { 40.0 };
            },
            &mut surface,
        );
        let changed = v.measure_rendered(&surface);

        println!(
            "scroll={scroll} window={:?} translate={} first={:?} measured={changed}",
            w,
            surface.offset,
            surface.rows.first()
        );
    }

    println!(
        "mode={:?} avg={:.2} total_size={:.0}",
        v.mode(),
        v.average_height(),
        v.total_size()
    );
    println!("pool={:?}", v.pool_stats());
    println!("row_at(2_000_000)={:?}", v.index_at_offset(2_000_000.0));

    let snapshot = v.export_measurements();
    println!("exported_measurements={}", snapshot.entries.len());

    v.destroy();
    println!("after destroy: pool={:?}", v.pool_stats());
}
