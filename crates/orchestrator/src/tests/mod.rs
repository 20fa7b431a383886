mod gateway_tests;
mod navigation_tests;
mod registry_tests;
