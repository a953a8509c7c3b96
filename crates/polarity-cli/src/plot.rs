use plotly::common::Mode;
use plotly::layout::{Axis, BarMode};
use plotly::{Bar, HeatMap, Layout, Plot, Scatter};

use polarity_classifiers::metrics::Metrics;

use crate::orchestrator::TrainingRun;

/// Grouped bars of the four held-out scores, one group per model.
pub fn plot_metric_comparison(runs: &[&TrainingRun]) -> Plot {
    let names: Vec<String> = runs.iter().map(|r| r.model_type.clone()).collect();
    let scores: [(&str, fn(&Metrics) -> f64); 4] = [
        ("Accuracy", |m| m.accuracy),
        ("Precision", |m| m.precision),
        ("Recall", |m| m.recall),
        ("F1", |m| m.f1),
    ];

    let mut plot = Plot::new();
    for (name, score) in scores {
        let values: Vec<f64> = runs.iter().map(|r| score(&r.metrics)).collect();
        plot.add_trace(Bar::new(names.clone(), values).name(name));
    }
    plot.set_layout(
        Layout::new()
            .title("Held-out Metrics by Model")
            .bar_mode(BarMode::Group)
            .x_axis(Axis::new().title("Model"))
            .y_axis(Axis::new().title("Score").range(vec![0.0, 1.05])),
    );
    plot
}

/// Confusion matrix heatmap; rows are true classes, columns predictions.
pub fn plot_confusion_matrix(run: &TrainingRun) -> Plot {
    let labels = run.metrics.labels.clone();
    let z: Vec<Vec<f64>> = run
        .metrics
        .confusion_matrix
        .iter()
        .map(|row| row.iter().map(|&c| c as f64).collect())
        .collect();

    let title = format!("{} Confusion Matrix", run.model_type);
    let mut plot = Plot::new();
    plot.add_trace(HeatMap::new(labels.clone(), labels, z).name(run.model_type.as_str()));
    plot.set_layout(
        Layout::new()
            .title(title.as_str())
            .x_axis(Axis::new().title("Predicted"))
            .y_axis(Axis::new().title("True")),
    );
    plot
}

/// Mean training loss per epoch for every model that reports one.
pub fn plot_losses(runs: &[&TrainingRun]) -> Option<Plot> {
    let mut plot = Plot::new();
    let mut traced = 0;
    for run in runs {
        let losses = run.summary.losses();
        if losses.is_empty() {
            continue;
        }
        let epochs: Vec<usize> = (1..=losses.len()).collect();
        plot.add_trace(
            Scatter::new(epochs, losses)
                .name(run.model_type.as_str())
                .mode(Mode::LinesMarkers),
        );
        traced += 1;
    }
    if traced == 0 {
        return None;
    }
    plot.set_layout(
        Layout::new()
            .title("Training Loss Over Epochs")
            .x_axis(Axis::new().title("Epoch"))
            .y_axis(Axis::new().title("Loss")),
    );
    Some(plot)
}
