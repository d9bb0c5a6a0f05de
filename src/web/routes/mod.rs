pub mod source_monitor_routes;
