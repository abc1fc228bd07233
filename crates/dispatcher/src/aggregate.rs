//! 流水线结果汇总与性能统计

use validator_core::{PipelinePerformance, PipelineSummary, ValidationResult};

/// 汇总结果列表，`reused` 为直接复用已存储结果的数量
pub fn summarize(results: &[ValidationResult], reused: usize) -> PipelineSummary {
    let mut summary = PipelineSummary {
        total_resources: results.len(),
        reused_results: reused,
        ..Default::default()
    };

    for result in results {
        if result.is_pipeline_failure() {
            summary.failed_validations += 1;
        } else {
            summary.successful_validations += 1;
        }
        if result.is_valid {
            summary.valid_resources += 1;
        } else {
            summary.invalid_resources += 1;
        }
        if result.from_cache {
            summary.cache_hits += 1;
        }

        summary.total_issues += result.issues.len();
        for issue in &result.issues {
            let aspect = issue
                .aspect
                .map(|aspect| aspect.as_str())
                .unwrap_or("pipeline");
            *summary
                .issues_by_aspect
                .entry(aspect.to_string())
                .or_default() += 1;
            *summary
                .issues_by_severity
                .entry(issue.severity.as_str().to_string())
                .or_default() += 1;
        }
    }

    summary
}

/// 根据各资源耗时与总耗时计算性能数据
pub fn measure(results: &[ValidationResult], total_time_ms: u64) -> PipelinePerformance {
    if results.is_empty() {
        return PipelinePerformance {
            total_time_ms,
            ..Default::default()
        };
    }

    let durations = results.iter().map(|result| result.duration_ms);
    let fastest_ms = durations.clone().min().unwrap_or(0);
    let slowest_ms = durations.clone().max().unwrap_or(0);
    let average_time_ms = durations.sum::<u64>() as f64 / results.len() as f64;
    let seconds = total_time_ms.max(1) as f64 / 1000.0;

    PipelinePerformance {
        total_time_ms,
        average_time_ms,
        fastest_ms,
        slowest_ms,
        throughput_per_second: results.len() as f64 / seconds,
    }
}
