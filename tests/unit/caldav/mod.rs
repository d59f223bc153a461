mod query_tests;
