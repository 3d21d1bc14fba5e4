pub mod coordinator;
pub mod package;
pub mod planner;

pub use coordinator::{AnalysisCoordinator, AnalysisReport, PackageResult, ResultSource};
pub use package::{synthetic_packages, PackageAnalysisHandler, PackageDescriptor, PACKAGE_ANALYSIS};
pub use planner::{OptimizationPlanner, WorkloadProfile};
