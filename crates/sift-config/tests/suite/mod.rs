mod tracing_init;
