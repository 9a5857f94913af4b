pub mod distribution;

pub use distribution::{
   CommandContext, DistributionStatus, print_outcomes, show_status, sync_addons, sync_dependencies,
};
